//! ATT&CK bundle loader.
//!
//! Consumes a STIX-style interchange bundle, taking only the live
//! `attack-pattern` objects: each becomes a TTP node keyed by its
//! authoritative external id. Tactic nodes are pre-existing reference data
//! — the link pass matches kill-chain phase names against them
//! case-insensitively and never creates one.

use anyhow::Result;
use serde_json::json;
use std::path::Path;

use vulngraph_model::records::{AttackBundle, AttackObject};
use vulngraph_model::vocab::{key, label, rel};
use vulngraph_model::{capec_key, technique_key};
use vulngraph_store::{EdgeSpec, GraphSession, Label, LinkReport, Linker, NodeRef, NodeSpec, RelType};

use crate::{list_value, log_link_error, read_json, IngestReport};

const CAPEC_SOURCE_NAME: &str = "capec";

pub fn load_entities(session: &mut dyn GraphSession, path: &Path) -> Result<IngestReport> {
    let ttp = Label::new(label::TTP)?;
    let bundle: AttackBundle = read_json(path)?;
    let mut report = IngestReport::default();

    for object in bundle.objects.iter().filter(|o| o.is_attack_pattern()) {
        let Some(id) = technique_key(&object.external_references) else {
            report.skipped += 1;
            tracing::warn!(name = ?object.name, "attack-pattern without an authoritative id");
            continue;
        };
        let spec = NodeSpec::new(NodeRef::single(ttp.clone(), key::TTP, id))
            .overwrite("name", json!(object.name))
            .overwrite("description", json!(object.description))
            .overwrite("killChainPhases", list_value(object.phase_names()));
        report.merge_node(session, &spec);
    }
    Ok(report)
}

pub fn link_cross(session: &mut dyn GraphSession, path: &Path) -> Result<LinkReport> {
    let ttp = Label::new(label::TTP)?;
    let tactic = Label::new(label::TACTIC)?;
    let capec = Label::new(label::CAPEC)?;
    let uses_tactic = RelType::new(rel::USES_TACTIC)?;
    let related_to = RelType::new(rel::RELATED_TO)?;

    let bundle: AttackBundle = read_json(path)?;
    let mut linker = Linker::new();

    for object in bundle.objects.iter().filter(|o| o.is_attack_pattern()) {
        let Some(id) = technique_key(&object.external_references) else {
            continue;
        };
        let src = NodeRef::single(ttp.clone(), key::TTP, id);

        for phase in object.phase_names() {
            // Resolve to the stored canonical casing; an unmatched phase
            // falls through to the linker's missing-target path.
            let name = session
                .find_key_ci(&tactic, key::TACTIC, &phase)?
                .unwrap_or(phase);
            let edge = EdgeSpec {
                src: src.clone(),
                rel: uses_tactic.clone(),
                dst: NodeRef::single(tactic.clone(), key::TACTIC, name),
            };
            if let Err(err) = linker.link(session, &edge) {
                log_link_error(&err, "technique-to-tactic link failed");
            }
        }

        for pattern in capec_references(object) {
            let edge = EdgeSpec {
                src: src.clone(),
                rel: related_to.clone(),
                dst: NodeRef::single(capec.clone(), key::CAPEC, pattern),
            };
            if let Err(err) = linker.link(session, &edge) {
                log_link_error(&err, "technique-to-pattern link failed");
            }
        }
    }
    Ok(linker.into_report())
}

fn capec_references(object: &AttackObject) -> Vec<String> {
    object
        .external_references
        .iter()
        .filter(|r| r.source_name.as_deref() == Some(CAPEC_SOURCE_NAME))
        .filter_map(|r| r.external_id.as_deref().and_then(capec_key))
        .collect()
}
