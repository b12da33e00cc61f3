//! Source-record shapes.
//!
//! One struct per file format consumed:
//! - row-oriented catalog exports (CWE, CAPEC) with spreadsheet-style column
//!   names;
//! - nested per-advisory CVE documents (metadata block + named containers of
//!   sub-record arrays);
//! - a STIX-style interchange bundle for ATT&CK (only `attack-pattern`
//!   objects and their phase/reference sub-fields are consumed);
//! - the KEV catalog document.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

// ============================================================================
// CWE catalog rows
// ============================================================================

/// One row of the CWE catalog export. Relationship-bearing fields
/// (`Related Weaknesses`, `Taxonomy Mappings`) stay raw here; decoding them
/// is the taxonomy parser's job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CweRecord {
    #[serde(rename = "CWE-ID", alias = "'CWE-ID")]
    pub id: Option<Value>,
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Weakness Abstraction")]
    pub abstraction: Option<String>,
    #[serde(rename = "Status")]
    pub status: Option<String>,
    #[serde(rename = "Description")]
    pub description: Option<String>,
    #[serde(rename = "Extended Description")]
    pub extended_description: Option<String>,
    #[serde(rename = "Related Weaknesses")]
    pub related_weaknesses: Option<String>,
    #[serde(rename = "Common Consequences")]
    pub consequences: Option<String>,
    #[serde(rename = "Potential Mitigations")]
    pub potential_mitigations: Option<String>,
    #[serde(rename = "Observed Examples")]
    pub observed_examples: Option<String>,
    #[serde(rename = "Taxonomy Mappings")]
    pub taxonomy_mappings: Option<String>,
    #[serde(rename = "Related Attack Patterns")]
    pub related_attack_patterns: Option<String>,
}

// ============================================================================
// CAPEC catalog rows
// ============================================================================

/// One row of the CAPEC catalog export.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapecRecord {
    #[serde(rename = "ID", alias = "'ID")]
    pub id: Option<Value>,
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Abstraction")]
    pub abstraction: Option<String>,
    #[serde(rename = "Description")]
    pub description: Option<String>,
    #[serde(rename = "Likelihood Of Attack")]
    pub likelihood: Option<String>,
    #[serde(rename = "Typical Severity")]
    pub severity: Option<String>,
    #[serde(rename = "Execution Flow")]
    pub execution_flow: Option<String>,
    #[serde(rename = "Prerequisites")]
    pub prerequisites: Option<String>,
    #[serde(rename = "Resources Required")]
    pub resources_required: Option<String>,
    #[serde(rename = "Consequences")]
    pub consequences: Option<String>,
    #[serde(rename = "Mitigations")]
    pub mitigations: Option<String>,
    #[serde(rename = "Related Weaknesses")]
    pub related_weaknesses: Option<String>,
    #[serde(rename = "Related Attack Patterns")]
    pub related_attack_patterns: Option<String>,
    #[serde(rename = "Taxonomy Mappings")]
    pub taxonomy_mappings: Option<String>,
}

// ============================================================================
// CVE advisory documents
// ============================================================================

/// One CVE advisory document: a metadata block plus a map of named
/// containers, each holding arrays of loosely shaped sub-records.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CveDocument {
    #[serde(default)]
    pub cve_metadata: CveMetadata,
    /// Container content is kept as raw JSON here: each container holds
    /// arrays of sub-records whose individual decode failures must skip one
    /// record, not the document.
    #[serde(default)]
    pub containers: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CveMetadata {
    pub cve_id: Option<String>,
    pub state: Option<String>,
    pub assigner_org_id: Option<String>,
    pub assigner_short_name: Option<String>,
    pub date_reserved: Option<String>,
    pub date_published: Option<String>,
    pub date_updated: Option<String>,
}

/// The sub-record arrays a single container may carry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerContent {
    #[serde(default)]
    pub metrics: Vec<Value>,
    #[serde(default)]
    pub references: Vec<Value>,
    #[serde(default)]
    pub affected: Vec<Value>,
    #[serde(default)]
    pub descriptions: Vec<Value>,
    #[serde(default)]
    pub problem_types: Vec<Value>,
    #[serde(default)]
    pub configurations: Vec<Value>,
    #[serde(default)]
    pub impacts: Vec<Value>,
    #[serde(default)]
    pub solutions: Vec<Value>,
    #[serde(default)]
    pub exploits: Vec<Value>,
    #[serde(default)]
    pub workarounds: Vec<Value>,
}

/// A metric sub-record. The CVSS v3.1 block wins over v3.0 when both are
/// present; a metric without a vector string has no natural key and is
/// skipped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricRecord {
    #[serde(rename = "cvssV3_1")]
    pub cvss_v3_1: Option<CvssBlock>,
    #[serde(rename = "cvssV3_0")]
    pub cvss_v3_0: Option<CvssBlock>,
}

impl MetricRecord {
    pub fn cvss(&self) -> Option<&CvssBlock> {
        self.cvss_v3_1.as_ref().or(self.cvss_v3_0.as_ref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvssBlock {
    pub vector_string: Option<String>,
    pub base_score: Option<f64>,
    pub base_severity: Option<String>,
    pub attack_vector: Option<String>,
    pub attack_complexity: Option<String>,
    pub privileges_required: Option<String>,
    pub user_interaction: Option<String>,
    pub scope: Option<String>,
    pub confidentiality_impact: Option<String>,
    pub integrity_impact: Option<String>,
    pub availability_impact: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferenceRecord {
    pub url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductRecord {
    pub vendor: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DescriptionRecord {
    pub lang: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProblemTypeRecord {
    #[serde(default)]
    pub descriptions: Vec<ProblemTypeDescription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemTypeDescription {
    pub cwe_id: Option<String>,
    pub description: Option<String>,
}

/// Configurations, impacts, solutions, exploits and workarounds all share
/// one shape: a description keyed by its own text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DescribedRecord {
    pub description: Option<String>,
}

// ============================================================================
// ATT&CK interchange bundle
// ============================================================================

/// A STIX-style bundle: typed objects with free-form properties. Only
/// `attack-pattern` objects are consumed here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttackBundle {
    #[serde(default)]
    pub objects: Vec<AttackObject>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttackObject {
    #[serde(rename = "type", default)]
    pub object_type: String,
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub kill_chain_phases: Vec<KillChainPhase>,
    #[serde(default)]
    pub external_references: Vec<ExternalReference>,
    #[serde(default)]
    pub revoked: bool,
    #[serde(rename = "x_mitre_deprecated", default)]
    pub deprecated: bool,
}

impl AttackObject {
    pub fn is_attack_pattern(&self) -> bool {
        self.object_type == "attack-pattern" && !self.revoked && !self.deprecated
    }

    /// Ordered kill-chain phase names carried by this object.
    pub fn phase_names(&self) -> Vec<String> {
        self.kill_chain_phases
            .iter()
            .filter_map(|p| p.phase_name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KillChainPhase {
    pub kill_chain_name: Option<String>,
    pub phase_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalReference {
    pub source_name: Option<String>,
    pub external_id: Option<String>,
    pub url: Option<String>,
}

// ============================================================================
// KEV catalog
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KevCatalog {
    #[serde(default)]
    pub vulnerabilities: Vec<KevEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KevEntry {
    #[serde(rename = "cveID")]
    pub cve_id: Option<String>,
    pub vendor_project: Option<String>,
    pub product: Option<String>,
    pub vulnerability_name: Option<String>,
    pub short_description: Option<String>,
    pub date_added: Option<String>,
    pub due_date: Option<String>,
    pub required_action: Option<String>,
    pub notes: Option<String>,
    pub known_ransomware_campaign_use: Option<String>,
    #[serde(default)]
    pub cwes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capec_row_accepts_the_apostrophe_id_column() {
        let row: CapecRecord =
            serde_json::from_str(r#"{"'ID": "'66", "Name": "SQL Injection"}"#).unwrap();
        assert_eq!(row.id, Some(serde_json::Value::from("'66")));
        assert_eq!(row.name.as_deref(), Some("SQL Injection"));
    }

    #[test]
    fn cve_document_decodes_metadata_and_keeps_containers_raw() {
        let doc: CveDocument = serde_json::from_str(
            r#"{
                "cveMetadata": {
                    "cveId": "CVE-2024-0001",
                    "state": "PUBLISHED",
                    "dateReserved": "2024-01-01T00:00:00Z"
                },
                "containers": {"cna": {"metrics": [{"cvssV3_1": {"vectorString": "CVSS:3.1/AV:N"}}]}}
            }"#,
        )
        .unwrap();
        assert_eq!(doc.cve_metadata.cve_id.as_deref(), Some("CVE-2024-0001"));
        assert!(doc.containers.contains_key("cna"));
    }

    #[test]
    fn metric_prefers_cvss_v31_over_v30() {
        let metric: MetricRecord = serde_json::from_str(
            r#"{
                "cvssV3_0": {"vectorString": "old"},
                "cvssV3_1": {"vectorString": "new", "baseScore": 9.8}
            }"#,
        )
        .unwrap();
        let cvss = metric.cvss().unwrap();
        assert_eq!(cvss.vector_string.as_deref(), Some("new"));
        assert_eq!(cvss.base_score, Some(9.8));
    }

    #[test]
    fn revoked_attack_patterns_are_filtered() {
        let obj: AttackObject = serde_json::from_str(
            r#"{"type": "attack-pattern", "name": "Old", "revoked": true}"#,
        )
        .unwrap();
        assert!(!obj.is_attack_pattern());

        let obj: AttackObject = serde_json::from_str(
            r#"{
                "type": "attack-pattern",
                "name": "Remote Services",
                "kill_chain_phases": [
                    {"kill_chain_name": "mitre-attack", "phase_name": "lateral-movement"}
                ]
            }"#,
        )
        .unwrap();
        assert!(obj.is_attack_pattern());
        assert_eq!(obj.phase_names(), vec!["lateral-movement"]);
    }

    #[test]
    fn kev_catalog_decodes_entries_with_cwes() {
        let catalog: KevCatalog = serde_json::from_str(
            r#"{
                "vulnerabilities": [{
                    "cveID": "CVE-2021-44228",
                    "vendorProject": "Apache",
                    "product": "Log4j",
                    "knownRansomwareCampaignUse": "Known",
                    "cwes": ["CWE-917", "CWE-20"]
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(catalog.vulnerabilities.len(), 1);
        let kev = &catalog.vulnerabilities[0];
        assert_eq!(kev.cve_id.as_deref(), Some("CVE-2021-44228"));
        assert_eq!(kev.cwes, vec!["CWE-917", "CWE-20"]);
    }
}
