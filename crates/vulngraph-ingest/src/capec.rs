//! CAPEC catalog loader.
//!
//! Same row-oriented shape as the weakness catalog, but its relation field
//! carries the relation type in-band (`NATURE:ChildOf`, `NATURE:PeerOf`,
//! ...): intra links use the normalized nature verbatim as the edge type.

use anyhow::Result;
use serde_json::json;
use std::path::Path;

use vulngraph_model::records::CapecRecord;
use vulngraph_model::vocab::{key, label, rel};
use vulngraph_model::{capec_key, cwe_key, ids};
use vulngraph_store::{EdgeSpec, GraphSession, Label, LinkReport, Linker, NodeRef, NodeSpec, RelType};
use vulngraph_taxonomy::{attack_entry_ids, parse_list, parse_related, RefKind};

use crate::{list_value, log_link_error, read_json_rows, IngestReport};

fn record_key(record: &CapecRecord) -> Option<String> {
    record
        .id
        .as_ref()
        .and_then(ids::raw_id_text)
        .as_deref()
        .and_then(capec_key)
}

pub fn load_entities(session: &mut dyn GraphSession, path: &Path) -> Result<IngestReport> {
    let capec = Label::new(label::CAPEC)?;
    let mut report = IngestReport::default();

    for row in read_json_rows(path)? {
        let record: CapecRecord = match serde_json::from_value(row) {
            Ok(r) => r,
            Err(err) => {
                report.errors += 1;
                tracing::warn!(error = %err, "undecodable attack-pattern row");
                continue;
            }
        };
        let Some(id) = record_key(&record) else {
            report.skipped += 1;
            tracing::warn!(raw = ?record.id, "attack-pattern row without a resolvable id");
            continue;
        };

        let spec = NodeSpec::new(NodeRef::single(capec.clone(), key::CAPEC, id))
            .overwrite("name", json!(record.name))
            .overwrite("abstraction", json!(record.abstraction))
            .overwrite("description", json!(record.description))
            .overwrite("likelihoodOfAttack", json!(record.likelihood))
            .overwrite("typicalSeverity", json!(record.severity))
            .overwrite(
                "executionFlow",
                list_value(parse_list(record.execution_flow.as_deref())),
            )
            .overwrite(
                "prerequisites",
                list_value(parse_list(record.prerequisites.as_deref())),
            )
            .overwrite(
                "resourcesRequired",
                list_value(parse_list(record.resources_required.as_deref())),
            )
            .overwrite(
                "consequences",
                list_value(parse_list(record.consequences.as_deref())),
            )
            .overwrite(
                "mitigations",
                list_value(parse_list(record.mitigations.as_deref())),
            )
            .overwrite("relatedAttackPatterns", json!(record.related_attack_patterns))
            .overwrite("taxonomyMappings", json!(record.taxonomy_mappings));
        report.merge_node(session, &spec);
    }
    Ok(report)
}

/// Pattern-to-pattern links, typed by the normalized nature carried in the
/// source field itself.
pub fn link_intra(session: &mut dyn GraphSession, path: &Path) -> Result<LinkReport> {
    let capec = Label::new(label::CAPEC)?;
    let mut linker = Linker::new();

    for row in read_json_rows(path)? {
        let Ok(record) = serde_json::from_value::<CapecRecord>(row) else {
            continue;
        };
        let Some(id) = record_key(&record) else {
            continue;
        };
        for related in parse_related(record.related_attack_patterns.as_deref(), RefKind::Capec) {
            let rel = match RelType::new(&related.rel_label) {
                Ok(rel) => rel,
                Err(err) => {
                    tracing::warn!(nature = %related.rel_label, error = %err, "unusable relation type");
                    continue;
                }
            };
            let edge = EdgeSpec {
                src: NodeRef::single(capec.clone(), key::CAPEC, id.clone()),
                rel,
                dst: NodeRef::single(capec.clone(), key::CAPEC, related.target_key),
            };
            if let Err(err) = linker.link(session, &edge) {
                log_link_error(&err, "attack-pattern relation failed");
            }
        }
    }
    Ok(linker.into_report())
}

/// Cross-source links: referenced weaknesses (plain id list) and technique
/// mappings filtered to the ATT&CK taxonomy.
pub fn link_cross(session: &mut dyn GraphSession, path: &Path) -> Result<LinkReport> {
    let capec = Label::new(label::CAPEC)?;
    let cwe = Label::new(label::CWE)?;
    let ttp = Label::new(label::TTP)?;
    let related_to = RelType::new(rel::RELATED_TO)?;
    let uses_ttp = RelType::new(rel::USES_TTP)?;
    let mut linker = Linker::new();

    for row in read_json_rows(path)? {
        let Ok(record) = serde_json::from_value::<CapecRecord>(row) else {
            continue;
        };
        let Some(id) = record_key(&record) else {
            continue;
        };
        let src = NodeRef::single(capec.clone(), key::CAPEC, id);

        for raw in parse_list(record.related_weaknesses.as_deref()) {
            let Some(weakness) = cwe_key(&raw) else {
                tracing::warn!(raw = %raw, "unresolvable weakness reference");
                continue;
            };
            let edge = EdgeSpec {
                src: src.clone(),
                rel: related_to.clone(),
                dst: NodeRef::single(cwe.clone(), key::CWE, weakness),
            };
            if let Err(err) = linker.link(session, &edge) {
                log_link_error(&err, "pattern-to-weakness link failed");
            }
        }

        for technique in attack_entry_ids(record.taxonomy_mappings.as_deref()) {
            let edge = EdgeSpec {
                src: src.clone(),
                rel: uses_ttp.clone(),
                dst: NodeRef::single(ttp.clone(), key::TTP, technique),
            };
            if let Err(err) = linker.link(session, &edge) {
                log_link_error(&err, "pattern-to-technique link failed");
            }
        }
    }
    Ok(linker.into_report())
}
