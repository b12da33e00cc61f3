//! Parameterized Cypher rendering.
//!
//! The only text ever interpolated into a query is an allow-listed token:
//! a [`Label`], a [`RelType`], or a checked property name. Every literal
//! value — keys, property bags, flag values — is carried as a bound
//! parameter. This keeps data-derived relation labels (already restricted
//! to `[A-Z0-9_]` by normalization) from ever becoming structural input,
//! and makes the rendered text independently testable.

use serde_json::{Map, Value};

use crate::{check_prop_name, EdgeSpec, Label, NodeRef, NodeSpec, Props, RelType, StoreError};

/// One renderable statement: query text plus its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CypherQuery {
    pub text: String,
    pub params: Map<String, Value>,
}

impl CypherQuery {
    fn bare(text: impl Into<String>) -> Self {
        CypherQuery {
            text: text.into(),
            params: Map::new(),
        }
    }
}

/// `CREATE CONSTRAINT ... IF NOT EXISTS` for one (label, key property).
pub fn ensure_constraint(label: &Label, key_prop: &str) -> Result<CypherQuery, StoreError> {
    check_prop_name(key_prop)?;
    let name = format!(
        "{}_{}_unique",
        label.as_str().to_ascii_lowercase(),
        key_prop.to_ascii_lowercase()
    );
    Ok(CypherQuery::bare(format!(
        "CREATE CONSTRAINT {name} IF NOT EXISTS FOR (n:{label}) REQUIRE n.{key_prop} IS UNIQUE"
    )))
}

/// Idempotent node merge keyed on the spec's key map. `create_only`
/// properties apply under `ON CREATE SET` only; `overwrite` properties are
/// refreshed on every run.
pub fn merge_node(spec: &NodeSpec) -> Result<CypherQuery, StoreError> {
    let mut params = Map::new();
    let pattern = key_pattern("key", &spec.node, &mut params)?;
    params.insert(
        "create_only".to_string(),
        Value::Object(props_to_map(&spec.create_only)),
    );
    params.insert(
        "overwrite".to_string(),
        Value::Object(props_to_map(&spec.overwrite)),
    );
    let text = format!(
        "MERGE (n:{label} {pattern}) \
         ON CREATE SET n += $create_only \
         SET n += $overwrite",
        label = spec.node.label,
    );
    Ok(CypherQuery { text, params })
}

pub fn node_exists(node: &NodeRef) -> Result<CypherQuery, StoreError> {
    let mut params = Map::new();
    let pattern = key_pattern("key", node, &mut params)?;
    let text = format!(
        "MATCH (n:{label} {pattern}) RETURN count(n) AS n",
        label = node.label
    );
    Ok(CypherQuery { text, params })
}

/// Edge merge between two matched nodes. Endpoint existence is checked
/// separately by the session; this statement never creates nodes.
pub fn merge_edge(edge: &EdgeSpec) -> Result<CypherQuery, StoreError> {
    let mut params = Map::new();
    let src = key_pattern("src", &edge.src, &mut params)?;
    let dst = key_pattern("dst", &edge.dst, &mut params)?;
    let text = format!(
        "MATCH (a:{src_label} {src}) \
         MATCH (b:{dst_label} {dst}) \
         MERGE (a)-[:{rel}]->(b)",
        src_label = edge.src.label,
        dst_label = edge.dst.label,
        rel = edge.rel,
    );
    Ok(CypherQuery { text, params })
}

pub fn set_property_all(
    label: &Label,
    prop: &str,
    value: &Value,
) -> Result<CypherQuery, StoreError> {
    check_prop_name(prop)?;
    let mut params = Map::new();
    params.insert("value".to_string(), value.clone());
    Ok(CypherQuery {
        text: format!("MATCH (n:{label}) SET n.{prop} = $value RETURN count(n) AS n"),
        params,
    })
}

pub fn set_property(node: &NodeRef, prop: &str, value: &Value) -> Result<CypherQuery, StoreError> {
    check_prop_name(prop)?;
    let mut params = Map::new();
    let pattern = key_pattern("key", node, &mut params)?;
    params.insert("value".to_string(), value.clone());
    Ok(CypherQuery {
        text: format!(
            "MATCH (n:{label} {pattern}) SET n.{prop} = $value RETURN count(n) AS n",
            label = node.label
        ),
        params,
    })
}

pub fn find_key_ci(label: &Label, key_prop: &str, value: &str) -> Result<CypherQuery, StoreError> {
    check_prop_name(key_prop)?;
    let mut params = Map::new();
    params.insert("value".to_string(), Value::String(value.to_string()));
    Ok(CypherQuery {
        text: format!(
            "MATCH (n:{label}) WHERE toLower(n.{key_prop}) = toLower($value) \
             RETURN n.{key_prop} AS key LIMIT 1"
        ),
        params,
    })
}

pub fn nodes(label: Option<&Label>) -> CypherQuery {
    let head = match label {
        Some(label) => format!("MATCH (n:{label})"),
        None => "MATCH (n)".to_string(),
    };
    CypherQuery::bare(format!(
        "{head} RETURN labels(n)[0] AS label, properties(n) AS props"
    ))
}

/// The fixed two-hop expansion pattern. One hop out through `rel` to a
/// shared linking node, one hop back in from its other neighbors.
pub fn expand_two_hop(start: &NodeRef, rel: &RelType) -> Result<CypherQuery, StoreError> {
    let mut params = Map::new();
    let pattern = key_pattern("key", start, &mut params)?;
    let text = format!(
        "MATCH (n:{label} {pattern})-[:{rel}]->(s)<-[:{rel}]-(m) \
         WHERE m <> n \
         RETURN labels(s)[0] AS shared_label, properties(s) AS shared_props, \
                labels(m)[0] AS related_label, properties(m) AS related_props",
        label = start.label,
    );
    Ok(CypherQuery { text, params })
}

pub fn count_nodes(label: Option<&Label>) -> CypherQuery {
    match label {
        Some(label) => CypherQuery::bare(format!("MATCH (n:{label}) RETURN count(n) AS n")),
        None => CypherQuery::bare("MATCH (n) RETURN count(n) AS n"),
    }
}

pub fn count_edges(rel: Option<&RelType>) -> CypherQuery {
    match rel {
        Some(rel) => CypherQuery::bare(format!("MATCH ()-[r:{rel}]->() RETURN count(r) AS n")),
        None => CypherQuery::bare("MATCH ()-[r]->() RETURN count(r) AS n"),
    }
}

/// Render a key map as `{prop: $prefix_prop, ...}`, binding each value.
fn key_pattern(
    prefix: &str,
    node: &NodeRef,
    params: &mut Map<String, Value>,
) -> Result<String, StoreError> {
    if node.key.is_empty() {
        return Err(StoreError::EmptyKey {
            label: node.label.as_str().to_string(),
        });
    }
    let mut parts = Vec::with_capacity(node.key.len());
    for (prop, value) in &node.key {
        check_prop_name(prop)?;
        let param = format!("{prefix}_{prop}");
        parts.push(format!("{prop}: ${param}"));
        params.insert(param, value.clone());
    }
    Ok(format!("{{{}}}", parts.join(", ")))
}

fn props_to_map(props: &Props) -> Map<String, Value> {
    props
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeSpec;

    fn label(s: &str) -> Label {
        Label::new(s).unwrap()
    }

    #[test]
    fn merge_node_binds_key_and_splits_property_groups() {
        let spec = NodeSpec::new(NodeRef::single(label("CVE"), "cveId", "CVE-2024-0001"))
            .create_only("dateReserved", "2024-01-01")
            .overwrite("description", "a 'quoted) value");
        let q = merge_node(&spec).unwrap();
        assert_eq!(
            q.text,
            "MERGE (n:CVE {cveId: $key_cveId}) \
             ON CREATE SET n += $create_only \
             SET n += $overwrite"
        );
        assert_eq!(q.params["key_cveId"], "CVE-2024-0001");
        assert_eq!(q.params["create_only"]["dateReserved"], "2024-01-01");
        // Literal values never appear in query text.
        assert!(!q.text.contains("quoted"));
    }

    #[test]
    fn composite_keys_render_every_key_property() {
        let node = NodeRef {
            label: label("Container"),
            key: Props::from([
                ("cveId".to_string(), Value::from("CVE-2024-0001")),
                ("type".to_string(), Value::from("cna")),
            ]),
        };
        let q = node_exists(&node).unwrap();
        assert_eq!(
            q.text,
            "MATCH (n:Container {cveId: $key_cveId, type: $key_type}) RETURN count(n) AS n"
        );
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn merge_edge_uses_prefixed_parameters_per_endpoint() {
        let edge = EdgeSpec {
            src: NodeRef::single(label("CAPEC"), "id", "CAPEC-66"),
            rel: RelType::new("RELATED_TO").unwrap(),
            dst: NodeRef::single(label("CWE"), "id", "CWE-89"),
        };
        let q = merge_edge(&edge).unwrap();
        assert_eq!(
            q.text,
            "MATCH (a:CAPEC {id: $src_id}) \
             MATCH (b:CWE {id: $dst_id}) \
             MERGE (a)-[:RELATED_TO]->(b)"
        );
        assert_eq!(q.params["src_id"], "CAPEC-66");
        assert_eq!(q.params["dst_id"], "CWE-89");
    }

    #[test]
    fn empty_merge_keys_are_rejected() {
        let node = NodeRef {
            label: label("CWE"),
            key: Props::new(),
        };
        assert!(matches!(
            node_exists(&node),
            Err(StoreError::EmptyKey { .. })
        ));
    }

    #[test]
    fn property_names_are_checked_before_interpolation() {
        let node = NodeRef::single(label("CVE"), "cveId", "CVE-2024-0001");
        assert!(set_property(&node, "exploited", &Value::Bool(true)).is_ok());
        assert!(matches!(
            set_property(&node, "x = true //", &Value::Bool(true)),
            Err(StoreError::InvalidProperty(_))
        ));
    }

    #[test]
    fn constraint_statement_names_follow_label_and_property() {
        let q = ensure_constraint(&label("CAPEC"), "id").unwrap();
        assert_eq!(
            q.text,
            "CREATE CONSTRAINT capec_id_unique IF NOT EXISTS \
             FOR (n:CAPEC) REQUIRE n.id IS UNIQUE"
        );
    }

    #[test]
    fn two_hop_pattern_is_fixed_and_excludes_the_start() {
        let start = NodeRef::single(label("CAPEC"), "id", "CAPEC-555");
        let rel = RelType::new("USES_TTP").unwrap();
        let q = expand_two_hop(&start, &rel).unwrap();
        assert!(q.text.contains("-[:USES_TTP]->(s)<-[:USES_TTP]-(m)"));
        assert!(q.text.contains("WHERE m <> n"));
    }
}
