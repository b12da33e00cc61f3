//! Cross-source linker.
//!
//! Materializes resolved relationships under the existence policy: node
//! identity belongs exclusively to the upsert layer, so an edge whose
//! endpoint has not been loaded yet is skipped and reported, never used to
//! create a placeholder. Because linking is idempotent and separated from
//! node creation, the link phase can simply be re-run after a late source
//! arrives.

use crate::{EdgeSpec, GraphSession, LinkOutcome, StoreError};

/// Structured diagnostic for an edge whose endpoint was absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTarget {
    pub src_key: String,
    pub rel: String,
    pub dst_key: String,
}

/// Aggregate outcome of one linking pass.
#[derive(Debug, Clone, Default)]
pub struct LinkReport {
    pub created: u64,
    pub existing: u64,
    pub missing: Vec<MissingTarget>,
    pub errors: u64,
}

impl LinkReport {
    pub fn merge(&mut self, other: LinkReport) {
        self.created += other.created;
        self.existing += other.existing;
        self.missing.extend(other.missing);
        self.errors += other.errors;
    }
}

/// Collects link outcomes over one pass.
#[derive(Debug, Default)]
pub struct Linker {
    report: LinkReport,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one edge, folding the outcome into the report. Store errors
    /// are recorded and returned so callers can log them per record; they
    /// never abort the pass.
    pub fn link(
        &mut self,
        session: &mut dyn GraphSession,
        edge: &EdgeSpec,
    ) -> Result<LinkOutcome, StoreError> {
        match session.merge_edge(edge) {
            Ok(LinkOutcome::Created) => {
                self.report.created += 1;
                Ok(LinkOutcome::Created)
            }
            Ok(LinkOutcome::Exists) => {
                self.report.existing += 1;
                Ok(LinkOutcome::Exists)
            }
            Ok(outcome @ (LinkOutcome::MissingSource | LinkOutcome::MissingTarget)) => {
                let diagnostic = MissingTarget {
                    src_key: edge.src.key_display(),
                    rel: edge.rel.as_str().to_string(),
                    dst_key: edge.dst.key_display(),
                };
                tracing::warn!(
                    src = %diagnostic.src_key,
                    rel = %diagnostic.rel,
                    dst = %diagnostic.dst_key,
                    missing = if outcome == LinkOutcome::MissingSource { "source" } else { "target" },
                    "skipping edge: endpoint not present"
                );
                self.report.missing.push(diagnostic);
                Ok(outcome)
            }
            Err(err) => {
                self.report.errors += 1;
                Err(err)
            }
        }
    }

    pub fn report(&self) -> &LinkReport {
        &self.report
    }

    pub fn into_report(self) -> LinkReport {
        self.report
    }
}
