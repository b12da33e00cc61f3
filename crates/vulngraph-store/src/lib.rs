//! Graph-store seam.
//!
//! The graph engine itself is an external collaborator: an ACID-ish
//! labeled-property store reachable over a session API. This crate owns
//! everything on our side of that boundary:
//!
//! - validated token types ([`Label`], [`RelType`]) — the only values ever
//!   interpolated into dynamic query text;
//! - the [`GraphSession`] contract (constraints, idempotent node/edge
//!   merges with create-only vs overwrite property groups, flag sweeps,
//!   similarity-index reads);
//! - [`MemoryGraph`], an in-process implementation used by tests and smoke
//!   runs;
//! - a Cypher renderer plus an HTTP transaction-API executor for real
//!   deployments ([`remote`]).
//!
//! Sessions are constructed resources passed into each component, never a
//! process-wide singleton. All literal values cross the boundary as bound
//! parameters; see [`cypher`].

pub mod cypher;
pub mod link;
pub mod memory;
pub mod remote;

pub use link::{LinkReport, Linker, MissingTarget};
pub use memory::MemoryGraph;
pub use remote::{CypherExecutor, CypherGraph, HttpExecutor};

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A property bag. `Value::Null` entries are treated as absent and never
/// overwrite previously stored values.
pub type Props = BTreeMap<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid label `{0}`: labels must match [A-Za-z][A-Za-z0-9_]*")]
    InvalidLabel(String),
    #[error("invalid relationship type `{0}`: must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidRelType(String),
    #[error("invalid property name `{0}`")]
    InvalidProperty(String),
    #[error("node spec for `{label}` has an empty merge key")]
    EmptyKey { label: String },
    #[error("store rejected write: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// Validated tokens
// ============================================================================

/// A node label, restricted to an identifier character class so it can be
/// interpolated into query text without structural injection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(String);

impl Label {
    pub fn new(raw: &str) -> Result<Self, StoreError> {
        let mut chars = raw.chars();
        let head_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
        if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            Ok(Label(raw.to_string()))
        } else {
            Err(StoreError::InvalidLabel(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A relationship type. Data-derived relation labels must pass through
/// `vulngraph_taxonomy::normalize_rel_label` before construction; this type
/// re-checks the character class regardless of origin.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelType(String);

impl RelType {
    pub fn new(raw: &str) -> Result<Self, StoreError> {
        let mut chars = raw.chars();
        let head_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            Ok(RelType(raw.to_string()))
        } else {
            Err(StoreError::InvalidRelType(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check a property name before it is interpolated as an identifier.
pub(crate) fn check_prop_name(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StoreError::InvalidProperty(name.to_string()))
    }
}

// ============================================================================
// Write/read specs
// ============================================================================

/// Identifies one node by label plus its merge-key properties. Single-keyed
/// entities carry one entry; composite sub-nodes (Container, Product,
/// Description, ProblemType) carry several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub label: Label,
    pub key: Props,
}

impl NodeRef {
    pub fn single(label: Label, key_prop: &str, key: impl Into<Value>) -> Self {
        NodeRef {
            label,
            key: Props::from([(key_prop.to_string(), key.into())]),
        }
    }

    /// Human-readable key rendering for diagnostics.
    pub fn key_display(&self) -> String {
        self.key
            .values()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// A create-or-update write keyed solely on (label, key).
///
/// `create_only` properties are set once at node creation and never touched
/// again (immutable provenance fields); `overwrite` properties are refreshed
/// on every ingestion. Null values in either group are dropped before the
/// write so absent source fields cannot erase stored ones.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub node: NodeRef,
    pub create_only: Props,
    pub overwrite: Props,
}

impl NodeSpec {
    pub fn new(node: NodeRef) -> Self {
        NodeSpec {
            node,
            create_only: Props::new(),
            overwrite: Props::new(),
        }
    }

    pub fn create_only(mut self, prop: &str, value: impl Into<Value>) -> Self {
        insert_non_null(&mut self.create_only, prop, value.into());
        self
    }

    pub fn overwrite(mut self, prop: &str, value: impl Into<Value>) -> Self {
        insert_non_null(&mut self.overwrite, prop, value.into());
        self
    }
}

fn insert_non_null(props: &mut Props, prop: &str, value: Value) {
    if !value.is_null() {
        props.insert(prop.to_string(), value);
    }
}

/// A directed typed edge between two existing nodes.
#[derive(Debug, Clone)]
pub struct EdgeSpec {
    pub src: NodeRef,
    pub rel: RelType,
    pub dst: NodeRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Matched,
}

/// Result of an edge merge under the existence policy: endpoints are looked
/// up first and never implicitly created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    Exists,
    MissingSource,
    MissingTarget,
}

/// One node returned by a read, with its full property bag.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub label: String,
    pub props: Props,
}

/// One row of the fixed two-hop expansion
/// `(start)-[:REL]->(shared)<-[:REL]-(related)`.
#[derive(Debug, Clone)]
pub struct Expansion {
    pub shared: NodeRecord,
    pub related: NodeRecord,
}

// ============================================================================
// Session contract
// ============================================================================

/// One transaction scope per call; implementations commit each write before
/// returning. No concurrent writers are assumed within a run — idempotent
/// merges are the sole correctness mechanism for retries and partial
/// re-runs.
pub trait GraphSession {
    /// Declare the per-label uniqueness constraint. Safe to re-issue.
    fn ensure_unique_constraint(&mut self, label: &Label, key_prop: &str)
        -> Result<(), StoreError>;

    /// Create-if-absent / merge-if-present, keyed solely on the spec's
    /// (label, key). Re-running with identical input is a no-op.
    fn merge_node(&mut self, spec: &NodeSpec) -> Result<MergeOutcome, StoreError>;

    fn node_exists(&mut self, node: &NodeRef) -> Result<bool, StoreError>;

    /// Merge an edge under the existence policy: absent endpoints are
    /// reported via the outcome, never created.
    fn merge_edge(&mut self, edge: &EdgeSpec) -> Result<LinkOutcome, StoreError>;

    /// Set one property on every node with the given label; returns the
    /// number of nodes touched. Used by the exploited-flag reset sweep.
    fn set_property_all(
        &mut self,
        label: &Label,
        prop: &str,
        value: Value,
    ) -> Result<u64, StoreError>;

    /// Set one property on a single node; `false` when the node is absent.
    fn set_property(
        &mut self,
        node: &NodeRef,
        prop: &str,
        value: Value,
    ) -> Result<bool, StoreError>;

    /// Case-insensitive key lookup; returns the stored (canonical-case) key.
    /// Used to match kill-chain phase names against pre-existing Tactic
    /// nodes without mutating them.
    fn find_key_ci(
        &mut self,
        label: &Label,
        key_prop: &str,
        value: &str,
    ) -> Result<Option<String>, StoreError>;

    /// All nodes of one label (or every labeled node when `None`), with
    /// their full property bags. Feeds the semantic index builder.
    fn nodes(&mut self, label: Option<&Label>) -> Result<Vec<NodeRecord>, StoreError>;

    /// Fixed two-hop expansion through one relationship type. Bounded by
    /// construction; this is deliberately not an open-ended traversal.
    fn expand_two_hop(
        &mut self,
        start: &NodeRef,
        rel: &RelType,
    ) -> Result<Vec<Expansion>, StoreError>;

    fn count_nodes(&mut self, label: Option<&Label>) -> Result<u64, StoreError>;

    fn count_edges(&mut self, rel: Option<&RelType>) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_reject_injection_shapes() {
        assert!(Label::new("CWE").is_ok());
        assert!(Label::new("ProblemType").is_ok());
        assert!(Label::new("").is_err());
        assert!(Label::new("CWE) DETACH DELETE (n").is_err());
        assert!(Label::new("CWE`").is_err());
        assert!(Label::new("1CWE").is_err());
    }

    #[test]
    fn rel_types_accept_normalized_natures() {
        assert!(RelType::new("RELATED_TO").is_ok());
        assert!(RelType::new("CHILDOF").is_ok());
        assert!(RelType::new("_FOO").is_ok());
        assert!(RelType::new("PEER OF").is_err());
        assert!(RelType::new("X]->(m) RETURN n//").is_err());
        assert!(RelType::new("").is_err());
    }

    #[test]
    fn node_spec_builders_drop_null_values() {
        let spec = NodeSpec::new(NodeRef::single(
            Label::new("CVE").unwrap(),
            "cveId",
            "CVE-2024-0001",
        ))
        .create_only("state", Value::Null)
        .overwrite("description", "text");
        assert!(spec.create_only.is_empty());
        assert_eq!(spec.overwrite.len(), 1);
    }
}
