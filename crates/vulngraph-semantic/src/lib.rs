//! Semantic similarity index over the knowledge graph.
//!
//! Two halves:
//! - **Build**: per configured label, concatenate the text-bearing
//!   properties of each node (lists and nested maps flattened to their
//!   string values), obtain an embedding, and store it back on the node.
//!   Nodes with no resulting text are not embedded.
//! - **Query**: embed the query text once, score by cosine similarity
//!   against every embedded node of a label (or all labeled nodes when
//!   unscoped), and return the top-k. An optional expansion step walks the
//!   fixed two-hop pattern through a named relationship (out to a shared
//!   linking node, back to its other neighbors) — bounded by construction,
//!   never an open-ended traversal.
//!
//! The embedding model is an opaque collaborator behind [`Embedder`]: a
//! deterministic token-hash backend for tests and offline runs, and an
//! HTTP backend for a real model server.

pub mod embedder;

pub use embedder::{Embedder, HashEmbedder, OllamaEmbedder};

use anyhow::{Context, Result};
use serde_json::Value;

use vulngraph_store::{Expansion, GraphSession, Label, NodeRecord, NodeRef, Props, RelType};

/// Property under which a node's vector is stored.
pub const EMBEDDING_PROP: &str = "embedding";

/// Which properties of one label feed its embedding text, in order.
#[derive(Debug, Clone)]
pub struct EmbedProfile {
    pub label: Label,
    pub key_prop: String,
    pub fields: Vec<String>,
}

impl EmbedProfile {
    pub fn new(label: Label, key_prop: &str, fields: &[&str]) -> Self {
        EmbedProfile {
            label,
            key_prop: key_prop.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Aggregate outcome of one index build.
#[derive(Debug, Clone, Default)]
pub struct EmbedReport {
    pub embedded: u64,
    pub skipped_no_text: u64,
    pub errors: u64,
}

/// One similarity hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub label: String,
    pub score: f32,
    pub props: Props,
}

impl SearchHit {
    /// Best-effort display id: whichever canonical key property is present.
    pub fn display_id(&self) -> String {
        for prop in ["id", "cveId", "externalId", "name"] {
            if let Some(Value::String(s)) = self.props.get(prop) {
                return s.clone();
            }
        }
        "?".to_string()
    }
}

// ============================================================================
// Build
// ============================================================================

/// Embed every node matched by `profile` and store the vector back on the
/// node. Per-node failures (missing key, embedding error, store rejection)
/// are logged and counted, never fatal.
pub fn build_index(
    session: &mut dyn GraphSession,
    embedder: &dyn Embedder,
    profile: &EmbedProfile,
) -> Result<EmbedReport> {
    let mut report = EmbedReport::default();
    let nodes = session
        .nodes(Some(&profile.label))
        .with_context(|| format!("reading {} nodes for embedding", profile.label))?;

    for node in nodes {
        let Some(key) = node.props.get(&profile.key_prop).cloned() else {
            report.errors += 1;
            tracing::warn!(label = %profile.label, "node missing key property; not embedded");
            continue;
        };

        let text = node_text(&node, &profile.fields);
        if text.is_empty() {
            report.skipped_no_text += 1;
            continue;
        }

        let vector = match embedder.embed(&text) {
            Ok(v) => v,
            Err(err) => {
                report.errors += 1;
                tracing::warn!(label = %profile.label, error = %err, "embedding failed");
                continue;
            }
        };

        let node_ref = NodeRef {
            label: profile.label.clone(),
            key: Props::from([(profile.key_prop.clone(), key)]),
        };
        let stored: Vec<Value> = vector.iter().map(|x| Value::from(*x as f64)).collect();
        match session.set_property(&node_ref, EMBEDDING_PROP, Value::Array(stored)) {
            Ok(true) => report.embedded += 1,
            Ok(false) => report.errors += 1,
            Err(err) => {
                report.errors += 1;
                tracing::warn!(label = %profile.label, error = %err, "storing embedding failed");
            }
        }
    }
    Ok(report)
}

/// Concatenate the configured fields of one node into embedding text.
/// Lists and nested maps are flattened to their string values; empty and
/// missing fields are skipped.
pub fn node_text(node: &NodeRecord, fields: &[String]) -> String {
    let mut parts = Vec::new();
    for field in fields {
        if let Some(value) = node.props.get(field) {
            flatten_into(value, &mut parts);
        }
    }
    parts.join(" ")
}

fn flatten_into(value: &Value, parts: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() {
                parts.push(s.to_string());
            }
        }
        Value::Number(n) => parts.push(n.to_string()),
        Value::Bool(b) => parts.push(b.to_string()),
        Value::Array(items) => {
            for item in items {
                flatten_into(item, parts);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                flatten_into(item, parts);
            }
        }
        Value::Null => {}
    }
}

// ============================================================================
// Query
// ============================================================================

/// Cosine-similarity top-k over embedded nodes, label-scoped or (with
/// `None`) across every labeled node carrying an embedding.
pub fn search(
    session: &mut dyn GraphSession,
    embedder: &dyn Embedder,
    query: &str,
    label: Option<&Label>,
    top_k: usize,
) -> Result<Vec<SearchHit>> {
    let query_vec = embedder.embed(query).context("embedding query text")?;

    let mut hits: Vec<SearchHit> = Vec::new();
    for node in session.nodes(label)? {
        let Some(vector) = stored_vector(&node.props) else {
            continue;
        };
        let score = cosine(&query_vec, &vector);
        hits.push(SearchHit {
            label: node.label,
            score,
            props: node.props,
        });
    }

    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(top_k);
    Ok(hits)
}

/// Expand one hit through the fixed two-hop pattern. `key_prop` identifies
/// the hit's canonical key property on its own label.
pub fn expand_hit(
    session: &mut dyn GraphSession,
    hit: &SearchHit,
    key_prop: &str,
    rel: &RelType,
) -> Result<Vec<Expansion>> {
    let label = Label::new(&hit.label)?;
    let Some(key) = hit.props.get(key_prop).cloned() else {
        return Ok(Vec::new());
    };
    let start = NodeRef {
        label,
        key: Props::from([(key_prop.to_string(), key)]),
    };
    Ok(session.expand_two_hop(&start, rel)?)
}

fn stored_vector(props: &Props) -> Option<Vec<f32>> {
    let Value::Array(items) = props.get(EMBEDDING_PROP)? else {
        return None;
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(item.as_f64()? as f32);
    }
    Some(out)
}

/// Cosine similarity; zero when either vector has no magnitude or the
/// dimensions disagree (stale index vs new backend).
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
