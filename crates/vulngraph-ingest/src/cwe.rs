//! CWE catalog loader.
//!
//! Entities come from a row-oriented JSON export of the weakness catalog.
//! Related-weakness links are same-source; the cross pass adds
//! technique links from taxonomy mappings and the ProblemType back-links
//! onto weaknesses referenced by CVE advisories.

use anyhow::Result;
use serde_json::json;
use std::path::Path;

use vulngraph_model::records::CweRecord;
use vulngraph_model::vocab::{key, label, rel};
use vulngraph_model::{cwe_key, ids};
use vulngraph_store::{EdgeSpec, GraphSession, Label, LinkReport, Linker, NodeRef, NodeSpec, RelType};
use vulngraph_taxonomy::{attack_entry_ids, parse_list, parse_related, RefKind};

use crate::{list_value, log_link_error, read_json_rows, IngestReport};

fn record_key(record: &CweRecord) -> Option<String> {
    record
        .id
        .as_ref()
        .and_then(ids::raw_id_text)
        .as_deref()
        .and_then(cwe_key)
}

pub fn load_entities(session: &mut dyn GraphSession, path: &Path) -> Result<IngestReport> {
    let cwe = Label::new(label::CWE)?;
    let mut report = IngestReport::default();

    for row in read_json_rows(path)? {
        let record: CweRecord = match serde_json::from_value(row) {
            Ok(r) => r,
            Err(err) => {
                report.errors += 1;
                tracing::warn!(error = %err, "undecodable weakness row");
                continue;
            }
        };
        let Some(id) = record_key(&record) else {
            report.skipped += 1;
            tracing::warn!(raw = ?record.id, "weakness row without a resolvable id");
            continue;
        };

        let spec = NodeSpec::new(NodeRef::single(cwe.clone(), key::CWE, id))
            .overwrite("name", json!(record.name))
            .overwrite("abstraction", json!(record.abstraction))
            .overwrite("status", json!(record.status))
            .overwrite("description", json!(record.description))
            .overwrite("extendedDescription", json!(record.extended_description))
            .overwrite(
                "commonConsequences",
                list_value(parse_list(record.consequences.as_deref())),
            )
            .overwrite(
                "potentialMitigations",
                list_value(parse_list(record.potential_mitigations.as_deref())),
            )
            .overwrite(
                "observedExamples",
                list_value(parse_list(record.observed_examples.as_deref())),
            )
            .overwrite("relatedWeaknesses", json!(record.related_weaknesses))
            .overwrite("taxonomyMappings", json!(record.taxonomy_mappings));
        report.merge_node(session, &spec);
    }
    Ok(report)
}

/// Weakness-to-weakness links from each row's related-weakness field. The
/// targets are other rows of the same catalog, so a missing endpoint means
/// the catalog export itself is incomplete — reported, not repaired.
pub fn link_intra(session: &mut dyn GraphSession, path: &Path) -> Result<LinkReport> {
    let cwe = Label::new(label::CWE)?;
    let related_to = RelType::new(rel::RELATED_TO)?;
    let mut linker = Linker::new();

    for row in read_json_rows(path)? {
        let Ok(record) = serde_json::from_value::<CweRecord>(row) else {
            continue;
        };
        let Some(id) = record_key(&record) else {
            continue;
        };
        for target in parse_related(record.related_weaknesses.as_deref(), RefKind::Cwe) {
            let edge = EdgeSpec {
                src: NodeRef::single(cwe.clone(), key::CWE, id.clone()),
                rel: related_to.clone(),
                dst: NodeRef::single(cwe.clone(), key::CWE, target.target_key),
            };
            if let Err(err) = linker.link(session, &edge) {
                log_link_error(&err, "weakness relation failed");
            }
        }
    }
    Ok(linker.into_report())
}

/// Cross-source links for weaknesses: technique references from taxonomy
/// mappings, and back-links from the ProblemType sub-nodes that advisories
/// attached for this weakness id.
pub fn link_cross(session: &mut dyn GraphSession, path: &Path) -> Result<LinkReport> {
    let cwe = Label::new(label::CWE)?;
    let ttp = Label::new(label::TTP)?;
    let problem_type = Label::new(label::PROBLEM_TYPE)?;
    let has_ttp = RelType::new(rel::HAS_TTP)?;
    let has_cwe = RelType::new(rel::HAS_CWE)?;
    let mut linker = Linker::new();

    // One scan of the ProblemType population, grouped by referenced id.
    let problem_refs: Vec<(String, NodeRef)> = session
        .nodes(Some(&problem_type))?
        .into_iter()
        .filter_map(|record| {
            let referenced = record.props.get("cweId")?.as_str()?.to_string();
            Some((
                referenced,
                NodeRef {
                    label: problem_type.clone(),
                    key: record.props,
                },
            ))
        })
        .collect();

    for row in read_json_rows(path)? {
        let Ok(record) = serde_json::from_value::<CweRecord>(row) else {
            continue;
        };
        let Some(id) = record_key(&record) else {
            continue;
        };

        for technique in attack_entry_ids(record.taxonomy_mappings.as_deref()) {
            let edge = EdgeSpec {
                src: NodeRef::single(cwe.clone(), key::CWE, id.clone()),
                rel: has_ttp.clone(),
                dst: NodeRef::single(ttp.clone(), key::TTP, technique),
            };
            if let Err(err) = linker.link(session, &edge) {
                log_link_error(&err, "weakness technique link failed");
            }
        }

        for (_, problem) in problem_refs.iter().filter(|(referenced, _)| *referenced == id) {
            let edge = EdgeSpec {
                src: problem.clone(),
                rel: has_cwe.clone(),
                dst: NodeRef::single(cwe.clone(), key::CWE, id.clone()),
            };
            if let Err(err) = linker.link(session, &edge) {
                log_link_error(&err, "problem-type back-link failed");
            }
        }
    }
    Ok(linker.into_report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use vulngraph_store::MemoryGraph;

    fn catalog_file(rows: serde_json::Value) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{rows}").unwrap();
        file
    }

    fn sample() -> NamedTempFile {
        catalog_file(json!([
            {
                "CWE-ID": "79",
                "Name": "Cross-site Scripting",
                "Weakness Abstraction": "Base",
                "Description": "Improper neutralization of input",
                "Common Consequences": "Confidentiality::Integrity",
                "Related Weaknesses": "::NATURE:ChildOf:CWE ID:20:VIEW ID:1000::",
                "Taxonomy Mappings": "::TAXONOMY NAME:ATTACK:ENTRY ID:1059:ENTRY NAME:Scripting::"
            },
            {"CWE-ID": "'20", "Name": "Improper Input Validation"},
            {"CWE-ID": "not-a-number", "Name": "Broken Row"}
        ]))
    }

    #[test]
    fn entities_upsert_with_normalized_keys_and_decoded_lists() {
        let mut g = MemoryGraph::new();
        let report = load_entities(&mut g, sample().path()).unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.skipped, 1);

        let nodes = g.nodes(Some(&Label::new("CWE").unwrap())).unwrap();
        let xss = nodes.iter().find(|n| n.props["id"] == "CWE-79").unwrap();
        assert_eq!(
            xss.props["commonConsequences"],
            json!(["Confidentiality", "Integrity"])
        );
        assert!(nodes.iter().any(|n| n.props["id"] == "CWE-20"));
    }

    #[test]
    fn reingesting_the_catalog_changes_nothing() {
        let file = sample();
        let mut g = MemoryGraph::new();
        load_entities(&mut g, file.path()).unwrap();
        let second = load_entities(&mut g, file.path()).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(g.count_nodes(None).unwrap(), 2);
    }

    #[test]
    fn intra_links_follow_the_related_field() {
        let file = sample();
        let mut g = MemoryGraph::new();
        load_entities(&mut g, file.path()).unwrap();
        let report = link_intra(&mut g, file.path()).unwrap();
        assert_eq!(report.created, 1);
        assert!(report.missing.is_empty());
        assert_eq!(
            g.count_edges(Some(&RelType::new("RELATED_TO").unwrap())).unwrap(),
            1
        );
    }

    #[test]
    fn a_target_absent_from_the_catalog_is_reported_not_created() {
        let file = catalog_file(json!([
            {"CWE-ID": "79", "Related Weaknesses": "::NATURE:ChildOf:CWE ID:9999::"}
        ]));
        let mut g = MemoryGraph::new();
        load_entities(&mut g, file.path()).unwrap();
        let report = link_intra(&mut g, file.path()).unwrap();
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].dst_key, "CWE-9999");
        assert_eq!(g.count_nodes(None).unwrap(), 1);
        assert_eq!(g.count_edges(None).unwrap(), 0);
    }

    #[test]
    fn cross_links_reach_techniques_and_problem_types() {
        let file = sample();
        let mut g = MemoryGraph::new();
        load_entities(&mut g, file.path()).unwrap();
        g.merge_node(&NodeSpec::new(NodeRef::single(
            Label::new("TTP").unwrap(),
            "externalId",
            "T1059",
        )))
        .unwrap();
        let problem = NodeRef {
            label: Label::new("ProblemType").unwrap(),
            key: vulngraph_store::Props::from([
                ("cweId".to_string(), json!("CWE-79")),
                ("description".to_string(), json!("XSS")),
            ]),
        };
        g.merge_node(&NodeSpec::new(problem)).unwrap();

        let report = link_cross(&mut g, file.path()).unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(
            g.count_edges(Some(&RelType::new("HAS_TTP").unwrap())).unwrap(),
            1
        );
        assert_eq!(
            g.count_edges(Some(&RelType::new("HAS_CWE").unwrap())).unwrap(),
            1
        );
    }
}
