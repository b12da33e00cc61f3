//! Phased ingestion orchestrator.
//!
//! Three phases over whatever sources are configured:
//!
//! 1. `Entities` — per-source node upserts, in dependency order.
//! 2. `IntraLinks` — relationships whose endpoints come from one source.
//! 3. `CrossLinks` — relationships across sources, plus the exploited-flag
//!    refresh; run after every participating source has loaded.
//!
//! Phases are individually re-invocable: merges are idempotent, and link
//! passes re-read their source files, so re-running `CrossLinks` after a
//! late source arrives back-fills the skipped edges.

use anyhow::{bail, Result};
use std::path::PathBuf;

use vulngraph_model::vocab::{key, label};
use vulngraph_store::{GraphSession, Label, LinkReport};

use crate::{attack, capec, cve, cwe, kev, IngestReport};

/// File locations for the configured sources; `None` skips that source.
#[derive(Debug, Clone, Default)]
pub struct SourcePaths {
    pub cwe: Option<PathBuf>,
    pub capec: Option<PathBuf>,
    /// Root of the advisory tree (year partition directories below it).
    pub cve: Option<PathBuf>,
    /// Year partitions to ingest; empty means the whole tree.
    pub cve_years: Vec<String>,
    pub attack: Option<PathBuf>,
    pub kev: Option<PathBuf>,
}

impl SourcePaths {
    fn is_empty(&self) -> bool {
        self.cwe.is_none()
            && self.capec.is_none()
            && self.cve.is_none()
            && self.attack.is_none()
            && self.kev.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Entities,
    IntraLinks,
    CrossLinks,
}

/// Accumulated counts across every executed phase.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub entities: IngestReport,
    pub links: LinkReport,
    pub exploited_flagged: u64,
}

pub struct Orchestrator {
    paths: SourcePaths,
}

impl Orchestrator {
    pub fn new(paths: SourcePaths) -> Self {
        Orchestrator { paths }
    }

    pub fn run(
        &self,
        session: &mut dyn GraphSession,
        phases: &[Phase],
    ) -> Result<RunReport> {
        if self.paths.is_empty() {
            bail!("no sources configured");
        }
        self.declare_constraints(session)?;

        let mut report = RunReport::default();
        for phase in phases {
            match phase {
                Phase::Entities => self.run_entities(session, &mut report)?,
                Phase::IntraLinks => self.run_intra_links(session, &mut report)?,
                Phase::CrossLinks => self.run_cross_links(session, &mut report)?,
            }
        }
        Ok(report)
    }

    fn declare_constraints(&self, session: &mut dyn GraphSession) -> Result<()> {
        for (label_name, key_prop) in [
            (label::CVE, key::CVE),
            (label::CWE, key::CWE),
            (label::CAPEC, key::CAPEC),
            (label::TTP, key::TTP),
            (label::KEV, key::KEV),
            (label::METRIC, key::METRIC),
            (label::REFERENCE, key::REFERENCE),
        ] {
            session.ensure_unique_constraint(&Label::new(label_name)?, key_prop)?;
        }
        Ok(())
    }

    fn run_entities(
        &self,
        session: &mut dyn GraphSession,
        report: &mut RunReport,
    ) -> Result<()> {
        if let Some(path) = &self.paths.cwe {
            report.entities.merge(cwe::load_entities(session, path)?);
        }
        if let Some(path) = &self.paths.capec {
            report.entities.merge(capec::load_entities(session, path)?);
        }
        if let Some(root) = &self.paths.cve {
            report
                .entities
                .merge(cve::load_entities(session, root, &self.paths.cve_years)?);
        }
        if let Some(path) = &self.paths.attack {
            report.entities.merge(attack::load_entities(session, path)?);
        }
        if let Some(path) = &self.paths.kev {
            report.entities.merge(kev::load_entities(session, path)?);
        }
        tracing::info!(
            created = report.entities.created,
            updated = report.entities.updated,
            skipped = report.entities.skipped,
            errors = report.entities.errors,
            "entity phase complete"
        );
        Ok(())
    }

    fn run_intra_links(
        &self,
        session: &mut dyn GraphSession,
        report: &mut RunReport,
    ) -> Result<()> {
        if let Some(path) = &self.paths.cwe {
            report.links.merge(cwe::link_intra(session, path)?);
        }
        if let Some(path) = &self.paths.capec {
            report.links.merge(capec::link_intra(session, path)?);
        }
        tracing::info!(
            created = report.links.created,
            missing = report.links.missing.len(),
            "intra-source link phase complete"
        );
        Ok(())
    }

    fn run_cross_links(
        &self,
        session: &mut dyn GraphSession,
        report: &mut RunReport,
    ) -> Result<()> {
        if let Some(path) = &self.paths.capec {
            report.links.merge(capec::link_cross(session, path)?);
        }
        if let Some(path) = &self.paths.cwe {
            report.links.merge(cwe::link_cross(session, path)?);
        }
        if let Some(path) = &self.paths.attack {
            report.links.merge(attack::link_cross(session, path)?);
        }
        if let Some(path) = &self.paths.kev {
            report.links.merge(kev::link_cross(session, path)?);
            report.exploited_flagged = kev::refresh_exploited(session, path)?.flagged;
        }
        tracing::info!(
            created = report.links.created,
            missing = report.links.missing.len(),
            "cross-source link phase complete"
        );
        Ok(())
    }
}
