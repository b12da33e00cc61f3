//! In-process graph store.
//!
//! Implements the full [`GraphSession`] contract over plain collections so
//! ingestion and the semantic index can be exercised without a running
//! graph engine. Behavior mirrors the remote implementation: merges keyed
//! on (label, key map), create-only vs overwrite property groups, the
//! endpoints-must-exist edge policy, and uniqueness enforcement for
//! declared constraints.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    EdgeSpec, Expansion, GraphSession, Label, LinkOutcome, MergeOutcome, NodeRecord, NodeRef,
    NodeSpec, Props, RelType, StoreError,
};

#[derive(Debug, Clone)]
struct MemNode {
    label: String,
    props: Props,
}

/// An in-memory labeled-property graph with idempotent merges.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    nodes: Vec<MemNode>,
    /// (src index, relationship type, dst index); a set, so re-merging an
    /// edge is naturally a no-op.
    edges: BTreeSet<(usize, String, usize)>,
    constraints: BTreeSet<(String, String)>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, node: &NodeRef) -> Option<usize> {
        self.nodes.iter().position(|n| {
            n.label == node.label.as_str()
                && node
                    .key
                    .iter()
                    .all(|(prop, value)| n.props.get(prop) == Some(value))
        })
    }

    fn record(&self, idx: usize) -> NodeRecord {
        let node = &self.nodes[idx];
        NodeRecord {
            label: node.label.clone(),
            props: node.props.clone(),
        }
    }

    /// Check declared uniqueness constraints before inserting a new node.
    fn check_unique(&self, label: &str, props: &Props) -> Result<(), StoreError> {
        for (_, key_prop) in self.constraints.iter().filter(|(l, _)| l == label) {
            let Some(value) = props.get(key_prop) else {
                continue;
            };
            let clash = self
                .nodes
                .iter()
                .any(|n| n.label == label && n.props.get(key_prop) == Some(value));
            if clash {
                return Err(StoreError::Rejected(format!(
                    "uniqueness constraint violated for {label}.{key_prop}"
                )));
            }
        }
        Ok(())
    }
}

impl GraphSession for MemoryGraph {
    fn ensure_unique_constraint(
        &mut self,
        label: &Label,
        key_prop: &str,
    ) -> Result<(), StoreError> {
        crate::check_prop_name(key_prop)?;
        self.constraints
            .insert((label.as_str().to_string(), key_prop.to_string()));
        Ok(())
    }

    fn merge_node(&mut self, spec: &NodeSpec) -> Result<MergeOutcome, StoreError> {
        if spec.node.key.is_empty() {
            return Err(StoreError::EmptyKey {
                label: spec.node.label.as_str().to_string(),
            });
        }

        if let Some(idx) = self.find(&spec.node) {
            // Matched: create-only fields are left untouched.
            let node = &mut self.nodes[idx];
            for (prop, value) in &spec.overwrite {
                if !value.is_null() {
                    node.props.insert(prop.clone(), value.clone());
                }
            }
            return Ok(MergeOutcome::Matched);
        }

        let mut props = spec.node.key.clone();
        for source in [&spec.create_only, &spec.overwrite] {
            for (prop, value) in source {
                if !value.is_null() {
                    props.insert(prop.clone(), value.clone());
                }
            }
        }
        self.check_unique(spec.node.label.as_str(), &props)?;
        self.nodes.push(MemNode {
            label: spec.node.label.as_str().to_string(),
            props,
        });
        Ok(MergeOutcome::Created)
    }

    fn node_exists(&mut self, node: &NodeRef) -> Result<bool, StoreError> {
        Ok(self.find(node).is_some())
    }

    fn merge_edge(&mut self, edge: &EdgeSpec) -> Result<LinkOutcome, StoreError> {
        let Some(src) = self.find(&edge.src) else {
            return Ok(LinkOutcome::MissingSource);
        };
        let Some(dst) = self.find(&edge.dst) else {
            return Ok(LinkOutcome::MissingTarget);
        };
        let inserted = self
            .edges
            .insert((src, edge.rel.as_str().to_string(), dst));
        Ok(if inserted {
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
        crate::check_prop_name(prop)?;
        let mut touched = 0;
        for node in self
            .nodes
            .iter_mut()
            .filter(|n| n.label == label.as_str())
        {
            node.props.insert(prop.to_string(), value.clone());
            touched += 1;
        }
        Ok(touched)
    }

    fn set_property(
        &mut self,
        node: &NodeRef,
        prop: &str,
        value: Value,
    ) -> Result<bool, StoreError> {
        crate::check_prop_name(prop)?;
        match self.find(node) {
            Some(idx) => {
                self.nodes[idx].props.insert(prop.to_string(), value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_key_ci(
        &mut self,
        label: &Label,
        key_prop: &str,
        value: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .nodes
            .iter()
            .filter(|n| n.label == label.as_str())
            .find_map(|n| match n.props.get(key_prop) {
                Some(Value::String(stored)) if stored.eq_ignore_ascii_case(value) => {
                    Some(stored.clone())
                }
                _ => None,
            }))
    }

    fn nodes(&mut self, label: Option<&Label>) -> Result<Vec<NodeRecord>, StoreError> {
        Ok(self
            .nodes
            .iter()
            .filter(|n| label.is_none_or(|l| n.label == l.as_str()))
            .map(|n| NodeRecord {
                label: n.label.clone(),
                props: n.props.clone(),
            })
            .collect())
    }

    fn expand_two_hop(
        &mut self,
        start: &NodeRef,
        rel: &RelType,
    ) -> Result<Vec<Expansion>, StoreError> {
        let Some(start_idx) = self.find(start) else {
            return Ok(Vec::new());
        };
        let rel = rel.as_str();

        let mut out = Vec::new();
        for (src, edge_rel, shared) in &self.edges {
            if *src != start_idx || edge_rel != rel {
                continue;
            }
            for (related, back_rel, dst) in &self.edges {
                if dst == shared && back_rel == rel && *related != start_idx {
                    out.push(Expansion {
                        shared: self.record(*shared),
                        related: self.record(*related),
                    });
                }
            }
        }
        Ok(out)
    }

    fn count_nodes(&mut self, label: Option<&Label>) -> Result<u64, StoreError> {
        Ok(self
            .nodes
            .iter()
            .filter(|n| label.is_none_or(|l| n.label == l.as_str()))
            .count() as u64)
    }

    fn count_edges(&mut self, rel: Option<&RelType>) -> Result<u64, StoreError> {
        Ok(self
            .edges
            .iter()
            .filter(|(_, r, _)| rel.is_none_or(|want| r == want.as_str()))
            .count() as u64)
    }
}

/// Seed helper for tests and smoke runs: pre-existing reference nodes
/// (Tactic) that this core matches against but never creates.
pub fn seed_node(
    session: &mut dyn GraphSession,
    label: &Label,
    props: Props,
) -> Result<(), StoreError> {
    let key: Props = props
        .iter()
        .take(1)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let spec = NodeSpec {
        node: NodeRef {
            label: label.clone(),
            key,
        },
        create_only: props,
        overwrite: BTreeMap::new(),
    };
    session.merge_node(&spec).map(|_| ())
}
