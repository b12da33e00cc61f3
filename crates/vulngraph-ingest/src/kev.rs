//! KEV catalog loader.
//!
//! The known-exploited list is one JSON document holding the full current
//! catalog. Entries become KEV nodes keyed by the advisory id they cite;
//! the link pass ties them to loaded advisories and weaknesses. The
//! exploited flag on advisories is a snapshot of this catalog: a refresh
//! clears it everywhere before re-marking the current set, so de-listed
//! advisories go back to false.

use anyhow::Result;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::path::Path;

use vulngraph_model::records::{KevCatalog, KevEntry};
use vulngraph_model::vocab::{key, label, rel, EXPLOITED_PROP};
use vulngraph_model::{cve_key, cwe_key};
use vulngraph_store::{EdgeSpec, GraphSession, Label, LinkReport, Linker, NodeRef, NodeSpec, RelType};

use crate::{log_link_error, read_json, IngestReport};

fn record_key(entry: &KevEntry) -> Option<String> {
    entry.cve_id.as_deref().and_then(cve_key)
}

/// Dates in the catalog are ISO `YYYY-MM-DD`; a malformed one is stored as
/// text anyway but flagged, since due-date queries will not see it.
fn date_text(raw: Option<String>, field: &str) -> Value {
    if let Some(text) = &raw {
        if NaiveDate::parse_from_str(text, "%Y-%m-%d").is_err() {
            tracing::warn!(field = %field, value = %text, "unparseable catalog date");
        }
    }
    json!(raw)
}

pub fn load_entities(session: &mut dyn GraphSession, path: &Path) -> Result<IngestReport> {
    let kev = Label::new(label::KEV)?;
    let catalog: KevCatalog = read_json(path)?;
    let mut report = IngestReport::default();

    for entry in catalog.vulnerabilities {
        let Some(id) = record_key(&entry) else {
            report.skipped += 1;
            tracing::warn!(raw = ?entry.cve_id, "listing without a resolvable advisory id");
            continue;
        };
        let spec = NodeSpec::new(NodeRef::single(kev.clone(), key::KEV, id))
            .overwrite("vendor", json!(entry.vendor_project))
            .overwrite("product", json!(entry.product))
            .overwrite("name", json!(entry.vulnerability_name))
            .overwrite("description", json!(entry.short_description))
            .overwrite("dateAdded", date_text(entry.date_added, "dateAdded"))
            .overwrite("dueDate", date_text(entry.due_date, "dueDate"))
            .overwrite("requiredAction", json!(entry.required_action))
            .overwrite("notes", json!(entry.notes))
            .overwrite(
                "knownRansomwareCampaignUse",
                json!(entry.known_ransomware_campaign_use),
            );
        report.merge_node(session, &spec);
    }
    Ok(report)
}

/// Tie each listing to its advisory and to the weaknesses it cites. A
/// listing for an advisory that was never loaded is the expected case for
/// partial year ingests — skipped and reported.
pub fn link_cross(session: &mut dyn GraphSession, path: &Path) -> Result<LinkReport> {
    let kev = Label::new(label::KEV)?;
    let cve = Label::new(label::CVE)?;
    let cwe = Label::new(label::CWE)?;
    let is_exploited_in = RelType::new(rel::IS_EXPLOITED_IN)?;
    let related_to = RelType::new(rel::RELATED_TO)?;

    let catalog: KevCatalog = read_json(path)?;
    let mut linker = Linker::new();

    for entry in catalog.vulnerabilities {
        let Some(id) = record_key(&entry) else {
            continue;
        };
        let edge = EdgeSpec {
            src: NodeRef::single(cve.clone(), key::CVE, id.clone()),
            rel: is_exploited_in.clone(),
            dst: NodeRef::single(kev.clone(), key::KEV, id.clone()),
        };
        if let Err(err) = linker.link(session, &edge) {
            log_link_error(&err, "listing-to-advisory link failed");
        }

        for raw in &entry.cwes {
            let Some(weakness) = cwe_key(raw) else {
                tracing::warn!(raw = %raw, "unresolvable weakness reference in listing");
                continue;
            };
            let edge = EdgeSpec {
                src: NodeRef::single(kev.clone(), key::KEV, id.clone()),
                rel: related_to.clone(),
                dst: NodeRef::single(cwe.clone(), key::CWE, weakness),
            };
            if let Err(err) = linker.link(session, &edge) {
                log_link_error(&err, "listing-to-weakness link failed");
            }
        }
    }
    Ok(linker.into_report())
}

/// Outcome of one exploited-flag refresh.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    /// Advisories swept back to false before re-marking.
    pub reset: u64,
    pub flagged: u64,
    /// Listings whose advisory is not in the graph.
    pub absent: u64,
}

/// Reset-then-set sweep: clear the flag on every advisory, then mark the
/// ones the current catalog lists.
pub fn refresh_exploited(session: &mut dyn GraphSession, path: &Path) -> Result<RefreshReport> {
    let cve = Label::new(label::CVE)?;
    let catalog: KevCatalog = read_json(path)?;

    let mut report = RefreshReport {
        reset: session.set_property_all(&cve, EXPLOITED_PROP, Value::Bool(false))?,
        ..RefreshReport::default()
    };

    for entry in catalog.vulnerabilities {
        let Some(id) = record_key(&entry) else {
            continue;
        };
        let node = NodeRef::single(cve.clone(), key::CVE, id.clone());
        if session.set_property(&node, EXPLOITED_PROP, Value::Bool(true))? {
            report.flagged += 1;
        } else {
            report.absent += 1;
            tracing::warn!(cve = %id, "listed advisory not present in graph");
        }
    }
    tracing::info!(
        reset = report.reset,
        flagged = report.flagged,
        absent = report.absent,
        "exploited flag refreshed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use vulngraph_store::MemoryGraph;

    fn catalog_file(entries: Value) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", json!({"vulnerabilities": entries})).unwrap();
        file
    }

    fn cve_node(g: &mut MemoryGraph, id: &str) {
        g.merge_node(&NodeSpec::new(NodeRef::single(
            Label::new("CVE").unwrap(),
            "cveId",
            id,
        )))
        .unwrap();
    }

    #[test]
    fn listings_upsert_and_relink_idempotently() {
        let file = catalog_file(json!([
            {
                "cveID": "CVE-2021-44228",
                "vendorProject": "Apache",
                "product": "Log4j",
                "vulnerabilityName": "Log4Shell",
                "dateAdded": "2021-12-10",
                "cwes": ["CWE-917"]
            }
        ]));
        let mut g = MemoryGraph::new();
        cve_node(&mut g, "CVE-2021-44228");
        g.merge_node(&NodeSpec::new(NodeRef::single(
            Label::new("CWE").unwrap(),
            "id",
            "CWE-917",
        )))
        .unwrap();

        load_entities(&mut g, file.path()).unwrap();
        let first = link_cross(&mut g, file.path()).unwrap();
        assert_eq!(first.created, 2);

        load_entities(&mut g, file.path()).unwrap();
        let second = link_cross(&mut g, file.path()).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.existing, 2);
        assert_eq!(g.count_edges(None).unwrap(), 2);
    }

    #[test]
    fn a_listing_without_its_advisory_is_reported() {
        let file = catalog_file(json!([{"cveID": "CVE-2020-0001"}]));
        let mut g = MemoryGraph::new();
        load_entities(&mut g, file.path()).unwrap();

        let report = link_cross(&mut g, file.path()).unwrap();
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].src_key, "CVE-2020-0001");
        assert_eq!(g.count_edges(None).unwrap(), 0);
    }

    #[test]
    fn refresh_resets_stale_flags_before_marking_current_listings() {
        let mut g = MemoryGraph::new();
        cve_node(&mut g, "CVE-2024-0001");
        cve_node(&mut g, "CVE-2024-0002");

        // First snapshot lists both.
        let first = catalog_file(json!([
            {"cveID": "CVE-2024-0001"},
            {"cveID": "CVE-2024-0002"}
        ]));
        refresh_exploited(&mut g, first.path()).unwrap();

        // Second snapshot drops the second advisory.
        let second = catalog_file(json!([{"cveID": "CVE-2024-0001"}]));
        let report = refresh_exploited(&mut g, second.path()).unwrap();
        assert_eq!(report.reset, 2);
        assert_eq!(report.flagged, 1);

        let nodes = g.nodes(Some(&Label::new("CVE").unwrap())).unwrap();
        let flag = |id: &str| {
            nodes
                .iter()
                .find(|n| n.props["cveId"] == id)
                .map(|n| n.props["exploited"].clone())
        };
        assert_eq!(flag("CVE-2024-0001"), Some(json!(true)));
        assert_eq!(flag("CVE-2024-0002"), Some(json!(false)));
    }

    #[test]
    fn malformed_dates_still_load_as_text() {
        let file = catalog_file(json!([
            {"cveID": "CVE-2024-0001", "dateAdded": "not-a-date"}
        ]));
        let mut g = MemoryGraph::new();
        load_entities(&mut g, file.path()).unwrap();

        let nodes = g.nodes(Some(&Label::new("KEV").unwrap())).unwrap();
        assert_eq!(nodes[0].props["dateAdded"], "not-a-date");
    }
}
