//! Remote graph sessions: rendered Cypher over an executor boundary.
//!
//! [`CypherGraph`] implements [`GraphSession`] by rendering each operation
//! with [`crate::cypher`] and handing the parameterized statement to a
//! [`CypherExecutor`]. The stock executor speaks the Neo4j HTTP
//! transaction API (one transaction per statement, committed immediately —
//! ingestion wraps each record in its own transaction so one bad record
//! never rolls back its predecessors). Tests inject a recording executor
//! instead.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::cypher::{self, CypherQuery};
use crate::{
    EdgeSpec, Expansion, GraphSession, Label, LinkOutcome, MergeOutcome, NodeRecord, NodeRef,
    NodeSpec, RelType, StoreError,
};

/// One result row, keyed by the statement's return column names.
pub type Row = Map<String, Value>;

/// Statement result plus the store's update counters, used to distinguish
/// created from matched merges.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub nodes_created: u64,
    pub relationships_created: u64,
}

impl QueryResult {
    /// First value of the first row, for single-scalar statements.
    fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|r| r.values().next())
    }

    fn scalar_u64(&self) -> u64 {
        self.scalar().and_then(Value::as_u64).unwrap_or(0)
    }
}

/// The transport boundary to the external graph engine.
pub trait CypherExecutor {
    fn run(&mut self, query: &CypherQuery) -> Result<QueryResult, StoreError>;
}

// ============================================================================
// GraphSession over an executor
// ============================================================================

pub struct CypherGraph<E> {
    executor: E,
}

impl<E: CypherExecutor> CypherGraph<E> {
    pub fn new(executor: E) -> Self {
        CypherGraph { executor }
    }

    fn node_record_from(prefix: &str, row: &Row) -> Option<NodeRecord> {
        let label = row.get(&format!("{prefix}_label"))?.as_str()?.to_string();
        let props = row
            .get(&format!("{prefix}_props"))?
            .as_object()?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Some(NodeRecord { label, props })
    }
}

impl<E: CypherExecutor> GraphSession for CypherGraph<E> {
    fn ensure_unique_constraint(
        &mut self,
        label: &Label,
        key_prop: &str,
    ) -> Result<(), StoreError> {
        self.executor
            .run(&cypher::ensure_constraint(label, key_prop)?)
            .map(|_| ())
    }

    fn merge_node(&mut self, spec: &NodeSpec) -> Result<MergeOutcome, StoreError> {
        let result = self.executor.run(&cypher::merge_node(spec)?)?;
        Ok(if result.nodes_created > 0 {
            MergeOutcome::Created
        } else {
            MergeOutcome::Matched
        })
    }

    fn node_exists(&mut self, node: &NodeRef) -> Result<bool, StoreError> {
        let result = self.executor.run(&cypher::node_exists(node)?)?;
        Ok(result.scalar_u64() > 0)
    }

    fn merge_edge(&mut self, edge: &EdgeSpec) -> Result<LinkOutcome, StoreError> {
        // Endpoint lookups come first so an absent node is reported, never
        // silently created by the merge.
        if !self.node_exists(&edge.src)? {
            return Ok(LinkOutcome::MissingSource);
        }
        if !self.node_exists(&edge.dst)? {
            return Ok(LinkOutcome::MissingTarget);
        }
        let result = self.executor.run(&cypher::merge_edge(edge)?)?;
        Ok(if result.relationships_created > 0 {
            LinkOutcome::Created
        } else {
            LinkOutcome::Exists
        })
    }

    fn set_property_all(
        &mut self,
        label: &Label,
        prop: &str,
        value: Value,
    ) -> Result<u64, StoreError> {
        let result = self
            .executor
            .run(&cypher::set_property_all(label, prop, &value)?)?;
        Ok(result.scalar_u64())
    }

    fn set_property(
        &mut self,
        node: &NodeRef,
        prop: &str,
        value: Value,
    ) -> Result<bool, StoreError> {
        let result = self
            .executor
            .run(&cypher::set_property(node, prop, &value)?)?;
        Ok(result.scalar_u64() > 0)
    }

    fn find_key_ci(
        &mut self,
        label: &Label,
        key_prop: &str,
        value: &str,
    ) -> Result<Option<String>, StoreError> {
        let result = self
            .executor
            .run(&cypher::find_key_ci(label, key_prop, value)?)?;
        Ok(result
            .scalar()
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn nodes(&mut self, label: Option<&Label>) -> Result<Vec<NodeRecord>, StoreError> {
        let result = self.executor.run(&cypher::nodes(label))?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                let label = row.get("label")?.as_str()?.to_string();
                let props = row
                    .get("props")?
                    .as_object()?
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Some(NodeRecord { label, props })
            })
            .collect())
    }

    fn expand_two_hop(
        &mut self,
        start: &NodeRef,
        rel: &RelType,
    ) -> Result<Vec<Expansion>, StoreError> {
        let result = self.executor.run(&cypher::expand_two_hop(start, rel)?)?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                Some(Expansion {
                    shared: Self::node_record_from("shared", row)?,
                    related: Self::node_record_from("related", row)?,
                })
            })
            .collect())
    }

    fn count_nodes(&mut self, label: Option<&Label>) -> Result<u64, StoreError> {
        Ok(self.executor.run(&cypher::count_nodes(label))?.scalar_u64())
    }

    fn count_edges(&mut self, rel: Option<&RelType>) -> Result<u64, StoreError> {
        Ok(self.executor.run(&cypher::count_edges(rel))?.scalar_u64())
    }
}

// ============================================================================
// Neo4j HTTP transaction-API executor
// ============================================================================

/// Blocking executor for the Neo4j HTTP transaction endpoint
/// (`POST {base}/db/{database}/tx/commit`). Credentials come from the
/// environment via the CLI; nothing here is hard-coded.
pub struct HttpExecutor {
    client: reqwest::blocking::Client,
    endpoint: String,
    username: String,
    password: String,
}

impl HttpExecutor {
    pub fn new(
        base_url: &str,
        database: &str,
        username: &str,
        password: &str,
    ) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| StoreError::Transport(format!("failed to build http client: {e}")))?;
        Ok(HttpExecutor {
            client,
            endpoint: format!(
                "{}/db/{}/tx/commit",
                base_url.trim_end_matches('/'),
                database
            ),
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxDatum>,
    stats: Option<TxStats>,
}

#[derive(Debug, Deserialize)]
struct TxDatum {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct TxStats {
    #[serde(default)]
    nodes_created: u64,
    #[serde(default)]
    relationships_created: u64,
}

#[derive(Debug, Deserialize)]
struct TxError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl CypherExecutor for HttpExecutor {
    fn run(&mut self, query: &CypherQuery) -> Result<QueryResult, StoreError> {
        let body = json!({
            "statements": [{
                "statement": query.text,
                "parameters": Value::Object(query.params.clone()),
                "includeStats": true,
            }]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .map_err(|e| {
                StoreError::Transport(format!(
                    "failed to reach graph store at {} ({e})",
                    self.endpoint
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(StoreError::Transport(format!(
                "graph store http error {status}: {text}"
            )));
        }

        let parsed: TxResponse = response
            .json()
            .map_err(|e| StoreError::Transport(format!("invalid transaction response: {e}")))?;

        if let Some(err) = parsed.errors.first() {
            return Err(StoreError::Rejected(format!(
                "{}: {}",
                err.code, err.message
            )));
        }

        let Some(result) = parsed.results.into_iter().next() else {
            return Ok(QueryResult::default());
        };

        let rows = result
            .data
            .iter()
            .map(|datum| {
                result
                    .columns
                    .iter()
                    .cloned()
                    .zip(datum.row.iter().cloned())
                    .collect()
            })
            .collect();

        let stats = result.stats.unwrap_or_default();
        Ok(QueryResult {
            rows,
            nodes_created: stats.nodes_created,
            relationships_created: stats.relationships_created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted executor: records every statement, replays canned results.
    struct ScriptedExecutor {
        log: Vec<CypherQuery>,
        results: Vec<QueryResult>,
    }

    impl ScriptedExecutor {
        fn new(results: Vec<QueryResult>) -> Self {
            ScriptedExecutor {
                log: Vec::new(),
                results,
            }
        }
    }

    impl CypherExecutor for ScriptedExecutor {
        fn run(&mut self, query: &CypherQuery) -> Result<QueryResult, StoreError> {
            self.log.push(query.clone());
            Ok(if self.results.is_empty() {
                QueryResult::default()
            } else {
                self.results.remove(0)
            })
        }
    }

    fn count_result(n: u64) -> QueryResult {
        QueryResult {
            rows: vec![Row::from_iter([("n".to_string(), Value::from(n))])],
            ..QueryResult::default()
        }
    }

    #[test]
    fn merge_outcome_follows_update_counters() {
        let created = QueryResult {
            nodes_created: 1,
            ..QueryResult::default()
        };
        let mut graph = CypherGraph::new(ScriptedExecutor::new(vec![
            created,
            QueryResult::default(),
        ]));

        let spec = NodeSpec::new(NodeRef::single(
            Label::new("CWE").unwrap(),
            "id",
            "CWE-79",
        ));
        assert_eq!(graph.merge_node(&spec).unwrap(), MergeOutcome::Created);
        assert_eq!(graph.merge_node(&spec).unwrap(), MergeOutcome::Matched);
    }

    #[test]
    fn merge_edge_skips_the_merge_when_the_target_is_absent() {
        // src exists (count 1), dst absent (count 0): no third statement.
        let mut graph = CypherGraph::new(ScriptedExecutor::new(vec![
            count_result(1),
            count_result(0),
        ]));

        let edge = EdgeSpec {
            src: NodeRef::single(Label::new("CAPEC").unwrap(), "id", "CAPEC-66"),
            rel: RelType::new("RELATED_TO").unwrap(),
            dst: NodeRef::single(Label::new("CWE").unwrap(), "id", "CWE-89"),
        };
        assert_eq!(graph.merge_edge(&edge).unwrap(), LinkOutcome::MissingTarget);
        assert_eq!(graph.executor.log.len(), 2);
        assert!(graph.executor.log[1].text.starts_with("MATCH (n:CWE"));
    }

    #[test]
    fn nodes_read_maps_label_and_property_columns() {
        let row = Row::from_iter([
            ("label".to_string(), Value::from("CAPEC")),
            (
                "props".to_string(),
                json!({"id": "CAPEC-66", "name": "SQL Injection"}),
            ),
        ]);
        let mut graph = CypherGraph::new(ScriptedExecutor::new(vec![QueryResult {
            rows: vec![row],
            ..QueryResult::default()
        }]));

        let nodes = graph.nodes(Some(&Label::new("CAPEC").unwrap())).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].label, "CAPEC");
        assert_eq!(nodes[0].props["name"], "SQL Injection");
    }

    #[test]
    fn find_key_ci_returns_the_stored_key() {
        let row = Row::from_iter([("key".to_string(), Value::from("Lateral Movement"))]);
        let mut graph = CypherGraph::new(ScriptedExecutor::new(vec![QueryResult {
            rows: vec![row],
            ..QueryResult::default()
        }]));

        let found = graph
            .find_key_ci(&Label::new("Tactic").unwrap(), "name", "lateral movement")
            .unwrap();
        assert_eq!(found.as_deref(), Some("Lateral Movement"));
    }
}
