//! Identifier normalization.
//!
//! Every entity type has exactly one canonical key form, used as its
//! uniqueness-constraint value. Normalizers return `None` (a sentinel, not
//! an error) when no canonical key can be derived; the upsert layer skips
//! and reports such records instead of aborting a batch.

use serde_json::Value;

use crate::records::ExternalReference;

/// Source tag of the authoritative ATT&CK reference inside a STIX
/// external-reference list.
pub const ATTACK_SOURCE_NAME: &str = "mitre-attack";

/// Canonical CWE key: `CWE-<n>`.
///
/// Accepts a bare number, an apostrophe-prefixed number (spreadsheet
/// escaping), or an already-prefixed `CWE-<n>`.
pub fn cwe_key(raw: &str) -> Option<String> {
    prefixed_key(raw, "CWE-")
}

/// Canonical CAPEC key: `CAPEC-<n>`. Same tolerances as [`cwe_key`].
pub fn capec_key(raw: &str) -> Option<String> {
    prefixed_key(raw, "CAPEC-")
}

/// Canonical CVE key: the advisory id verbatim, shape-checked
/// (`CVE-<year>-<serial>`).
pub fn cve_key(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let rest = raw.strip_prefix("CVE-")?;
    let (year, serial) = rest.split_once('-')?;
    if year.len() == 4
        && year.bytes().all(|b| b.is_ascii_digit())
        && serial.len() >= 4
        && serial.bytes().all(|b| b.is_ascii_digit())
    {
        Some(raw.to_string())
    } else {
        None
    }
}

/// Canonical technique key: the `external_id` of the first external
/// reference whose source tag is `mitre-attack`, used verbatim
/// (`T1059`, `T1548.004`).
pub fn technique_key(references: &[ExternalReference]) -> Option<String> {
    references
        .iter()
        .find(|r| r.source_name.as_deref() == Some(ATTACK_SOURCE_NAME))
        .and_then(|r| r.external_id.as_deref())
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

/// Render a loosely typed JSON id (string or number) as raw text for
/// normalization. CSV-derived catalogs are inconsistent about this.
pub fn raw_id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn prefixed_key(raw: &str, prefix: &str) -> Option<String> {
    let raw = raw.trim();
    let raw = raw.strip_prefix('\'').unwrap_or(raw);
    let digits = raw.strip_prefix(prefix).unwrap_or(raw);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(format!("{prefix}{digits}"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_and_apostrophe_prefixed_numbers_collapse() {
        assert_eq!(cwe_key("79"), Some("CWE-79".to_string()));
        assert_eq!(cwe_key("'79"), Some("CWE-79".to_string()));
        assert_eq!(capec_key("'66 "), Some("CAPEC-66".to_string()));
        assert_eq!(capec_key("CAPEC-66"), Some("CAPEC-66".to_string()));
    }

    #[test]
    fn unresolvable_ids_yield_the_sentinel() {
        assert_eq!(cwe_key(""), None);
        assert_eq!(cwe_key("abc"), None);
        assert_eq!(cwe_key("CWE-"), None);
        assert_eq!(cve_key("CVE-124"), None);
        assert_eq!(cve_key("2024-1234"), None);
    }

    #[test]
    fn cve_keys_pass_through_verbatim() {
        assert_eq!(
            cve_key(" CVE-2024-50801 "),
            Some("CVE-2024-50801".to_string())
        );
        assert_eq!(
            cve_key("CVE-2021-4428900"),
            Some("CVE-2021-4428900".to_string())
        );
    }

    #[test]
    fn technique_key_prefers_the_attack_source() {
        let refs = vec![
            ExternalReference {
                source_name: Some("capec".to_string()),
                external_id: Some("CAPEC-555".to_string()),
                url: None,
            },
            ExternalReference {
                source_name: Some("mitre-attack".to_string()),
                external_id: Some("T1021.001".to_string()),
                url: Some("https://attack.mitre.org/techniques/T1021/001".to_string()),
            },
        ];
        assert_eq!(technique_key(&refs), Some("T1021.001".to_string()));
    }

    #[test]
    fn technique_key_is_none_without_an_attack_reference() {
        let refs = vec![ExternalReference {
            source_name: Some("nist".to_string()),
            external_id: Some("X-1".to_string()),
            url: None,
        }];
        assert_eq!(technique_key(&refs), None);
        assert_eq!(technique_key(&[]), None);
    }

    #[test]
    fn raw_id_text_accepts_strings_and_numbers() {
        assert_eq!(raw_id_text(&Value::from("'12")), Some("'12".to_string()));
        assert_eq!(raw_id_text(&Value::from(12)), Some("12".to_string()));
        assert_eq!(raw_id_text(&Value::Null), None);
    }
}
