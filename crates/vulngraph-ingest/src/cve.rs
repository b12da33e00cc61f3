//! CVE advisory loader.
//!
//! Advisories arrive as one JSON document per file, organized under year
//! partition directories. Each document becomes a CVE node (provenance
//! metadata is create-only: the first ingest wins) plus a tree of
//! content-keyed sub-nodes hung off per-container nodes. Sub-nodes are
//! keyed by their own natural content, so identical metrics, references or
//! descriptions across advisories collapse to one shared node.

use anyhow::{bail, Result};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use vulngraph_model::cve_key;
use vulngraph_model::records::{
    ContainerContent, CveDocument, DescribedRecord, DescriptionRecord, MetricRecord,
    ProblemTypeRecord, ProductRecord, ReferenceRecord,
};
use vulngraph_model::vocab::{key, label, rel};
use vulngraph_store::{
    EdgeSpec, GraphSession, Label, LinkOutcome, NodeRef, NodeSpec, Props, RelType,
};

use crate::{list_value, read_json, IngestReport};

/// Collect advisory files under `root`, optionally restricted to year
/// partitions. A requested partition that does not exist is reported back,
/// never an error: late-arriving years are the normal case.
pub fn partition_files(root: &Path, years: &[String]) -> (Vec<PathBuf>, Vec<String>) {
    let mut missing = Vec::new();
    let roots: Vec<PathBuf> = if years.is_empty() {
        vec![root.to_path_buf()]
    } else {
        years
            .iter()
            .filter_map(|year| {
                let dir = root.join(year);
                if dir.is_dir() {
                    Some(dir)
                } else {
                    missing.push(year.clone());
                    None
                }
            })
            .collect()
    };

    let mut files = Vec::new();
    for dir in roots {
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with("CVE") && name.ends_with(".json") {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    (files, missing)
}

pub fn load_entities(
    session: &mut dyn GraphSession,
    root: &Path,
    years: &[String],
) -> Result<IngestReport> {
    let (files, missing) = partition_files(root, years);
    for year in &missing {
        tracing::warn!(year = %year, root = %root.display(), "year partition absent; skipped");
    }
    if files.is_empty() {
        bail!("no advisory files found under {}", root.display());
    }

    let vocab = CveVocab::new()?;
    let mut report = IngestReport::default();
    for file in &files {
        let document: Value = match read_json(file) {
            Ok(v) => v,
            Err(err) => {
                report.errors += 1;
                tracing::warn!(file = %file.display(), error = %err, "unreadable advisory file");
                continue;
            }
        };
        // A file may hold one advisory or a batch of them.
        match document {
            Value::Array(items) => {
                for item in items {
                    ingest_document(session, &vocab, item, &mut report);
                }
            }
            other => ingest_document(session, &vocab, other, &mut report),
        }
    }
    Ok(report)
}

/// Pre-validated labels and relation types for the advisory tree.
struct CveVocab {
    cve: Label,
    container: Label,
    has_container: RelType,
    has_problem_type: RelType,
    sub_kinds: Vec<SubKind>,
}

/// One container sub-record family: where it lives in the container, its
/// label, its edge type, and how one raw item becomes a node spec.
struct SubKind {
    field: fn(&ContainerContent) -> &[Value],
    label: Label,
    rel: RelType,
    decode: fn(&Label, Value) -> Option<NodeSpec>,
}

impl CveVocab {
    fn new() -> Result<Self> {
        let described = |label_name: &str,
                         rel_name: &str,
                         field: fn(&ContainerContent) -> &[Value]|
         -> Result<SubKind> {
            Ok(SubKind {
                field,
                label: Label::new(label_name)?,
                rel: RelType::new(rel_name)?,
                decode: decode_described,
            })
        };
        Ok(CveVocab {
            cve: Label::new(label::CVE)?,
            container: Label::new(label::CONTAINER)?,
            has_container: RelType::new(rel::HAS_CONTAINER)?,
            has_problem_type: RelType::new(rel::HAS_PROBLEM_TYPE)?,
            sub_kinds: vec![
                SubKind {
                    field: |c| &c.metrics,
                    label: Label::new(label::METRIC)?,
                    rel: RelType::new(rel::HAS_METRIC)?,
                    decode: decode_metric,
                },
                SubKind {
                    field: |c| &c.references,
                    label: Label::new(label::REFERENCE)?,
                    rel: RelType::new(rel::HAS_REFERENCE)?,
                    decode: decode_reference,
                },
                SubKind {
                    field: |c| &c.affected,
                    label: Label::new(label::PRODUCT)?,
                    rel: RelType::new(rel::AFFECTS_PRODUCT)?,
                    decode: decode_product,
                },
                SubKind {
                    field: |c| &c.descriptions,
                    label: Label::new(label::DESCRIPTION)?,
                    rel: RelType::new(rel::HAS_DESCRIPTION)?,
                    decode: decode_description,
                },
                described(label::CONFIGURATION, rel::HAS_CONFIGURATION, |c| {
                    &c.configurations
                })?,
                described(label::IMPACT, rel::HAS_IMPACT, |c| &c.impacts)?,
                described(label::SOLUTION, rel::HAS_SOLUTION, |c| &c.solutions)?,
                described(label::EXPLOIT, rel::HAS_EXPLOIT, |c| &c.exploits)?,
                described(label::WORKAROUND, rel::HAS_WORKAROUND, |c| &c.workarounds)?,
            ],
        })
    }
}

fn ingest_document(
    session: &mut dyn GraphSession,
    vocab: &CveVocab,
    document: Value,
    report: &mut IngestReport,
) {
    let document: CveDocument = match serde_json::from_value(document) {
        Ok(d) => d,
        Err(err) => {
            report.errors += 1;
            tracing::warn!(error = %err, "undecodable advisory document");
            return;
        }
    };
    let Some(id) = document.cve_metadata.cve_id.as_deref().and_then(cve_key) else {
        report.skipped += 1;
        tracing::warn!(raw = ?document.cve_metadata.cve_id, "advisory without a resolvable id");
        return;
    };

    let metadata = &document.cve_metadata;
    let cve_ref = NodeRef::single(vocab.cve.clone(), key::CVE, id.clone());
    let spec = NodeSpec::new(cve_ref.clone())
        .create_only("state", json!(metadata.state))
        .create_only("assignerOrgId", json!(metadata.assigner_org_id))
        .create_only("assignerShortName", json!(metadata.assigner_short_name))
        .create_only("dateReserved", json!(metadata.date_reserved))
        .create_only("datePublished", json!(metadata.date_published))
        .create_only("dateUpdated", json!(metadata.date_updated));
    if !report.merge_node(session, &spec) {
        return;
    }

    for (container_type, content) in &document.containers {
        let instances: Vec<&Value> = match content {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![content],
            other => {
                report.errors += 1;
                tracing::warn!(cve = %id, container = %container_type, shape = ?other, "unexpected container shape");
                continue;
            }
        };
        for instance in instances {
            ingest_container(session, vocab, &cve_ref, &id, container_type, instance, report);
        }
    }
}

fn ingest_container(
    session: &mut dyn GraphSession,
    vocab: &CveVocab,
    cve_ref: &NodeRef,
    cve_id: &str,
    container_type: &str,
    content: &Value,
    report: &mut IngestReport,
) {
    let container_ref = NodeRef {
        label: vocab.container.clone(),
        key: Props::from([
            (key::CVE.to_string(), json!(cve_id)),
            ("type".to_string(), json!(container_type)),
        ]),
    };
    if !report.merge_node(session, &NodeSpec::new(container_ref.clone())) {
        return;
    }
    attach(
        session,
        report,
        EdgeSpec {
            src: cve_ref.clone(),
            rel: vocab.has_container.clone(),
            dst: container_ref.clone(),
        },
    );

    let content: ContainerContent = match serde_json::from_value(content.clone()) {
        Ok(c) => c,
        Err(err) => {
            report.errors += 1;
            tracing::warn!(cve = %cve_id, container = %container_type, error = %err, "undecodable container");
            return;
        }
    };

    for kind in &vocab.sub_kinds {
        for item in (kind.field)(&content) {
            ingest_sub_record(session, kind, &container_ref, item.clone(), report);
        }
    }
    // Problem types expand to several keyed descriptions per record.
    for item in &content.problem_types {
        for spec in decode_problem_types(item.clone()) {
            if report.merge_node(session, &spec) {
                attach(
                    session,
                    report,
                    EdgeSpec {
                        src: container_ref.clone(),
                        rel: vocab.has_problem_type.clone(),
                        dst: spec.node.clone(),
                    },
                );
            }
        }
    }
}

fn ingest_sub_record(
    session: &mut dyn GraphSession,
    kind: &SubKind,
    container_ref: &NodeRef,
    item: Value,
    report: &mut IngestReport,
) {
    let Some(spec) = (kind.decode)(&kind.label, item) else {
        report.skipped += 1;
        return;
    };
    if report.merge_node(session, &spec) {
        attach(
            session,
            report,
            EdgeSpec {
                src: container_ref.clone(),
                rel: kind.rel.clone(),
                dst: spec.node.clone(),
            },
        );
    }
}

/// Structural edge within the advisory tree; both endpoints were merged
/// moments ago, so anything but created/exists is a store fault.
fn attach(session: &mut dyn GraphSession, report: &mut IngestReport, edge: EdgeSpec) {
    match session.merge_edge(&edge) {
        Ok(LinkOutcome::Created) => report.links.created += 1,
        Ok(LinkOutcome::Exists) => report.links.existing += 1,
        Ok(_) | Err(_) => {
            report.errors += 1;
            tracing::warn!(
                src = %edge.src.key_display(),
                rel = %edge.rel,
                dst = %edge.dst.key_display(),
                "structural edge failed"
            );
        }
    }
}

fn decode<T: DeserializeOwned>(item: Value) -> Option<T> {
    serde_json::from_value(item).ok()
}

fn decode_metric(metric_label: &Label, item: Value) -> Option<NodeSpec> {
    let record: MetricRecord = decode(item)?;
    let cvss = record.cvss()?;
    let vector = cvss.vector_string.clone()?;
    Some(
        NodeSpec::new(NodeRef::single(metric_label.clone(), key::METRIC, vector))
            .create_only("baseScore", json!(cvss.base_score))
            .create_only("baseSeverity", json!(cvss.base_severity))
            .create_only("attackVector", json!(cvss.attack_vector))
            .create_only("attackComplexity", json!(cvss.attack_complexity))
            .create_only("privilegesRequired", json!(cvss.privileges_required))
            .create_only("userInteraction", json!(cvss.user_interaction))
            .create_only("scope", json!(cvss.scope))
            .create_only("confidentialityImpact", json!(cvss.confidentiality_impact))
            .create_only("integrityImpact", json!(cvss.integrity_impact))
            .create_only("availabilityImpact", json!(cvss.availability_impact))
            .create_only("version", json!(cvss.version)),
    )
}

fn decode_reference(reference_label: &Label, item: Value) -> Option<NodeSpec> {
    let record: ReferenceRecord = decode(item)?;
    let url = record.url?;
    Some(
        NodeSpec::new(NodeRef::single(reference_label.clone(), key::REFERENCE, url))
            .create_only("tags", list_value(record.tags)),
    )
}

fn decode_product(product_label: &Label, item: Value) -> Option<NodeSpec> {
    let record: ProductRecord = decode(item)?;
    let (vendor, product) = (record.vendor?, record.product?);
    Some(NodeSpec::new(NodeRef {
        label: product_label.clone(),
        key: Props::from([
            ("vendor".to_string(), json!(vendor)),
            ("product".to_string(), json!(product)),
        ]),
    }))
}

fn decode_description(description_label: &Label, item: Value) -> Option<NodeSpec> {
    let record: DescriptionRecord = decode(item)?;
    let (lang, value) = (record.lang?, record.value?);
    Some(NodeSpec::new(NodeRef {
        label: description_label.clone(),
        key: Props::from([
            ("lang".to_string(), json!(lang)),
            ("value".to_string(), json!(value)),
        ]),
    }))
}

fn decode_described(described_label: &Label, item: Value) -> Option<NodeSpec> {
    let record: DescribedRecord = decode(item)?;
    let description = record.description?;
    Some(NodeSpec::new(NodeRef::single(
        described_label.clone(),
        key::DESCRIBED,
        description,
    )))
}

fn decode_problem_types(item: Value) -> Vec<NodeSpec> {
    let Some(record) = decode::<ProblemTypeRecord>(item) else {
        return Vec::new();
    };
    let Ok(problem_type) = Label::new(label::PROBLEM_TYPE) else {
        return Vec::new();
    };
    record
        .descriptions
        .into_iter()
        .filter_map(|desc| {
            let cwe_id = desc.cwe_id?;
            Some(NodeSpec::new(NodeRef {
                label: problem_type.clone(),
                key: Props::from([
                    ("cweId".to_string(), json!(cwe_id)),
                    (
                        "description".to_string(),
                        json!(desc.description.unwrap_or_default()),
                    ),
                ]),
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use vulngraph_store::MemoryGraph;

    fn advisory(id: &str, vector: &str) -> Value {
        json!({
            "cveMetadata": {
                "cveId": id,
                "state": "PUBLISHED",
                "dateReserved": "2024-01-01T00:00:00Z"
            },
            "containers": {
                "cna": {
                    "metrics": [{"cvssV3_1": {"vectorString": vector, "baseScore": 9.8}}],
                    "references": [{"url": "https://example.org/advisory"}],
                    "affected": [{"vendor": "Acme", "product": "Widget"}],
                    "descriptions": [{"lang": "en", "value": "Remote code execution"}],
                    "problemTypes": [{"descriptions": [{"cweId": "CWE-89", "description": "SQLi"}]}]
                }
            }
        })
    }

    fn tree_with(files: &[(&str, &str, Value)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (year, name, doc) in files {
            let partition = dir.path().join(year);
            fs::create_dir_all(&partition).unwrap();
            fs::write(partition.join(name), doc.to_string()).unwrap();
        }
        dir
    }

    #[test]
    fn an_advisory_becomes_a_node_tree_with_shared_subnodes() {
        let dir = tree_with(&[
            (
                "2024",
                "CVE-2024-0001.json",
                advisory("CVE-2024-0001", "CVS:3.1/AV:N"),
            ),
            (
                "2024",
                "CVE-2024-0002.json",
                advisory("CVE-2024-0002", "CVS:3.1/AV:N"),
            ),
        ]);
        let mut g = MemoryGraph::new();
        let report = load_entities(&mut g, dir.path(), &[]).unwrap();
        assert_eq!(report.errors, 0);

        let mut count = |l: &str| g.count_nodes(Some(&Label::new(l).unwrap())).unwrap();
        assert_eq!(count("CVE"), 2);
        assert_eq!(count("Container"), 2);
        // Identical metric, reference, product, description and problem
        // type collapse to one node each.
        assert_eq!(count("Metric"), 1);
        assert_eq!(count("Reference"), 1);
        assert_eq!(count("Product"), 1);
        assert_eq!(count("Description"), 1);
        assert_eq!(count("ProblemType"), 1);
        assert_eq!(
            g.count_edges(Some(&RelType::new("HAS_METRIC").unwrap())).unwrap(),
            2
        );
    }

    #[test]
    fn reingest_is_a_no_op() {
        let dir = tree_with(&[(
            "2024",
            "CVE-2024-0001.json",
            advisory("CVE-2024-0001", "CVS:3.1/AV:N"),
        )]);
        let mut g = MemoryGraph::new();
        load_entities(&mut g, dir.path(), &[]).unwrap();
        let nodes = g.count_nodes(None).unwrap();
        let edges = g.count_edges(None).unwrap();

        let second = load_entities(&mut g, dir.path(), &[]).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(g.count_nodes(None).unwrap(), nodes);
        assert_eq!(g.count_edges(None).unwrap(), edges);
    }

    #[test]
    fn provenance_fields_keep_their_first_ingested_value() {
        let dir = tree_with(&[(
            "2024",
            "CVE-2024-0001.json",
            advisory("CVE-2024-0001", "CVS:3.1/AV:N"),
        )]);
        let mut g = MemoryGraph::new();
        load_entities(&mut g, dir.path(), &[]).unwrap();

        let mut altered = advisory("CVE-2024-0001", "CVS:3.1/AV:N");
        altered["cveMetadata"]["dateReserved"] = json!("2030-12-31T00:00:00Z");
        fs::write(
            dir.path().join("2024").join("CVE-2024-0001.json"),
            altered.to_string(),
        )
        .unwrap();
        load_entities(&mut g, dir.path(), &[]).unwrap();

        let cves = g.nodes(Some(&Label::new("CVE").unwrap())).unwrap();
        assert_eq!(cves[0].props["dateReserved"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn missing_year_partitions_are_skipped_not_fatal() {
        let dir = tree_with(&[(
            "2023",
            "CVE-2023-1111.json",
            advisory("CVE-2023-1111", "CVS:3.1/AV:L"),
        )]);
        let years = vec!["2023".to_string(), "2021".to_string()];
        let (files, missing) = partition_files(dir.path(), &years);
        assert_eq!(files.len(), 1);
        assert_eq!(missing, vec!["2021".to_string()]);

        let mut g = MemoryGraph::new();
        load_entities(&mut g, dir.path(), &years).unwrap();
        assert_eq!(g.count_nodes(Some(&Label::new("CVE").unwrap())).unwrap(), 1);
    }

    #[test]
    fn a_tree_without_advisories_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut g = MemoryGraph::new();
        assert!(load_entities(&mut g, dir.path(), &[]).is_err());
    }

    #[test]
    fn a_malformed_document_skips_that_document_only() {
        let dir = tree_with(&[(
            "2024",
            "CVE-2024-0001.json",
            advisory("CVE-2024-0001", "CVS:3.1/AV:N"),
        )]);
        fs::write(dir.path().join("2024").join("CVE-2024-junk.json"), "{not json")
            .unwrap();

        let mut g = MemoryGraph::new();
        let report = load_entities(&mut g, dir.path(), &[]).unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(g.count_nodes(Some(&Label::new("CVE").unwrap())).unwrap(), 1);
    }
}
