//! Per-source loaders and the phased ingestion orchestrator.
//!
//! Each source module owns both halves of its source's life cycle: an
//! entity pass that upserts nodes (plus the structural edges whose
//! endpoints it creates itself), and link passes that materialize
//! relationships whose targets belong to other sources. Link passes
//! re-read the source file, so any phase subset can be re-invoked after a
//! late source arrives — idempotent merges make the re-run safe.
//!
//! Error posture throughout: one malformed record is logged and counted,
//! never fatal. Only a source file that cannot be read or decoded at all
//! aborts its pass.

pub mod attack;
pub mod capec;
pub mod cve;
pub mod cwe;
pub mod kev;
pub mod orchestrator;

pub use orchestrator::{Orchestrator, Phase, RunReport, SourcePaths};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::path::Path;

use vulngraph_store::{GraphSession, LinkReport, MergeOutcome, NodeSpec, StoreError};

/// Aggregate outcome of one entity pass.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
    /// Structural edges created alongside the entities (container trees).
    pub links: LinkReport,
}

impl IngestReport {
    pub fn merge(&mut self, other: IngestReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.links.merge(other.links);
    }

    /// Fold one node merge into the counters; store errors are logged with
    /// the offending key and counted, never propagated.
    fn merge_node(&mut self, session: &mut dyn GraphSession, spec: &NodeSpec) -> bool {
        match session.merge_node(spec) {
            Ok(MergeOutcome::Created) => {
                self.created += 1;
                true
            }
            Ok(MergeOutcome::Matched) => {
                self.updated += 1;
                true
            }
            Err(err) => {
                self.errors += 1;
                tracing::warn!(
                    label = %spec.node.label,
                    key = %spec.node.key_display(),
                    error = %err,
                    "node merge failed"
                );
                false
            }
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("decoding {}", path.display()))
}

/// Decode a file holding a JSON array, keeping each element raw so one
/// malformed record skips that record rather than the file.
fn read_json_rows(path: &Path) -> Result<Vec<Value>> {
    read_json::<Vec<Value>>(path)
}

fn log_link_error(err: &StoreError, context: &str) {
    tracing::warn!(error = %err, "{context}");
}

/// `None` and empty lists render as null so the builder drops them; an
/// absent source field must never overwrite a stored list with `[]`.
fn list_value(items: Vec<String>) -> Value {
    if items.is_empty() {
        Value::Null
    } else {
        Value::from(items)
    }
}
