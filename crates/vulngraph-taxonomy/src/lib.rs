//! Decoders for the delimited mini-grammars CWE and CAPEC pack into single
//! text fields.
//!
//! The catalogs flatten structured facts into one cell using a two-level
//! convention: `::` separates repeated entries, and within an entry a `:`
//! token stream carries `KEY:VALUE` pairs. Values may themselves contain
//! colons, so decoding anchors on a closed vocabulary of known key tokens
//! (`NATURE`, `CWE ID`, `CAPEC ID`, `TAXONOMY NAME`, `ENTRY ID`) instead of
//! treating every token as a key.
//!
//! Contract (shared by every decoder here):
//! - absent/empty/unrecognizable input decodes to an empty list, never an
//!   error;
//! - a partial entry (missing one of its expected keys) contributes nothing
//!   rather than a garbage tuple.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Outer delimiter between repeated entries.
const ENTRY_DELIM: &str = "::";

/// Marker that opens each segment of a taxonomy-mapping field.
const TAXONOMY_MARKER: &str = "TAXONOMY NAME:";

/// A decoded list element. Integer-looking tokens are normalized to a
/// numeric value; everything else passes through as text. A mixed list is
/// valid output, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Text(String),
}

impl Scalar {
    fn from_token(token: &str) -> Self {
        match token.parse::<i64>() {
            Ok(n) => Scalar::Int(n),
            Err(_) => Scalar::Text(token.to_string()),
        }
    }
}

/// Which catalog a related-entry field points into. Determines both the key
/// token to anchor on and the canonical key prefix of the decoded target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Cwe,
    Capec,
}

impl RefKind {
    fn id_token(self) -> &'static str {
        match self {
            RefKind::Cwe => "CWE ID",
            RefKind::Capec => "CAPEC ID",
        }
    }

    pub fn key_prefix(self) -> &'static str {
        match self {
            RefKind::Cwe => "CWE-",
            RefKind::Capec => "CAPEC-",
        }
    }
}

/// One decoded related-entry tuple: the canonical key of the target and the
/// normalized relation label derived from the entry's `NATURE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedRef {
    pub target_key: String,
    pub rel_label: String,
}

/// Decode a plain `::`-delimited list into trimmed, non-empty strings.
pub fn parse_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    raw.split(ENTRY_DELIM)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Decode a `::`-delimited list, normalizing integer-looking entries.
pub fn parse_scalar_list(raw: Option<&str>) -> Vec<Scalar> {
    parse_list(raw)
        .into_iter()
        .map(|s| Scalar::from_token(&s))
        .collect()
}

/// Decode a related-weakness / related-attack-pattern field.
///
/// Each entry carries `NATURE:<nature>` and `<KIND> ID:<numeric id>` among
/// other tokens (`VIEW ID`, `ORDINAL`, ...). Entries missing either anchor
/// key, or whose id is not numeric, are dropped.
pub fn parse_related(raw: Option<&str>, kind: RefKind) -> Vec<RelatedRef> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in raw.split(ENTRY_DELIM) {
        let tokens: Vec<&str> = entry.split(':').map(str::trim).collect();
        let Some(nature) = value_after(&tokens, "NATURE") else {
            continue;
        };
        let Some(id) = value_after(&tokens, kind.id_token()) else {
            continue;
        };
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let rel_label = normalize_rel_label(nature);
        if rel_label.is_empty() {
            continue;
        }
        out.push(RelatedRef {
            target_key: format!("{}{}", kind.key_prefix(), id),
            rel_label,
        });
    }
    out
}

/// Extract technique keys from a taxonomy-mapping field, filtered to one
/// taxonomy.
///
/// The field is segmented by `TAXONOMY NAME:` markers; a segment belongs to
/// the target taxonomy when its leading token equals `taxonomy` exactly.
/// Matching segments yield their `ENTRY ID` with a `T` prefix
/// (`ENTRY ID:1059` → `T1059`, sub-technique ids like `1548.004` keep the
/// dotted suffix).
pub fn taxonomy_entry_ids(raw: Option<&str>, taxonomy: &str) -> Vec<String> {
    static ENTRY_ID: OnceLock<Regex> = OnceLock::new();
    let entry_id = ENTRY_ID.get_or_init(|| {
        Regex::new(r"ENTRY ID:(\d+(?:\.\d+)*)").expect("static regex")
    });

    let Some(raw) = raw else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for segment in raw.split(TAXONOMY_MARKER) {
        let name = segment.split(':').next().unwrap_or("").trim();
        if name != taxonomy {
            continue;
        }
        if let Some(caps) = entry_id.captures(segment) {
            out.push(format!("T{}", &caps[1]));
        }
    }
    out
}

/// Convenience wrapper for the ATT&CK taxonomy, the one cross-reference this
/// graph materializes.
pub fn attack_entry_ids(raw: Option<&str>) -> Vec<String> {
    taxonomy_entry_ids(raw, "ATTACK")
}

/// Normalize a data-derived relation token into a label safe for use as a
/// graph relationship type: every non-alphanumeric byte becomes `_`, the
/// result is upper-cased. `ChildOf` → `CHILDOF`, `Can Follow` → `CAN_FOLLOW`.
pub fn normalize_rel_label(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Find the token following an exact key token. Anchoring on the closed key
/// set keeps values containing colons from being misread as keys.
fn value_after<'a>(tokens: &[&'a str], key: &str) -> Option<&'a str> {
    tokens
        .iter()
        .position(|t| *t == key)
        .and_then(|i| tokens.get(i + 1))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_and_absent_inputs_decode_to_empty() {
        assert!(parse_list(None).is_empty());
        assert!(parse_list(Some("")).is_empty());
        assert!(parse_list(Some(" :: :: ")).is_empty());
        assert!(parse_related(None, RefKind::Cwe).is_empty());
        assert!(parse_related(Some("no keys here"), RefKind::Cwe).is_empty());
        assert!(attack_entry_ids(None).is_empty());
        assert!(attack_entry_ids(Some("garbage")).is_empty());
    }

    #[test]
    fn plain_list_trims_and_drops_blanks() {
        let got = parse_list(Some("Step 1:: Step 2 ::::Step 3"));
        assert_eq!(got, vec!["Step 1", "Step 2", "Step 3"]);
    }

    #[test]
    fn scalar_list_normalizes_integers_and_keeps_text() {
        let got = parse_scalar_list(Some("123::High::456"));
        assert_eq!(
            got,
            vec![
                Scalar::Int(123),
                Scalar::Text("High".to_string()),
                Scalar::Int(456),
            ]
        );
    }

    #[test]
    fn related_capec_entries_decode_to_key_and_label_pairs() {
        let raw = "NATURE:ChildOf:CAPEC ID:123::NATURE:PeerOf:CAPEC ID:456";
        let got = parse_related(Some(raw), RefKind::Capec);
        assert_eq!(
            got,
            vec![
                RelatedRef {
                    target_key: "CAPEC-123".to_string(),
                    rel_label: "CHILDOF".to_string(),
                },
                RelatedRef {
                    target_key: "CAPEC-456".to_string(),
                    rel_label: "PEEROF".to_string(),
                },
            ]
        );
    }

    #[test]
    fn related_cwe_entries_ignore_trailing_view_tokens() {
        let raw = "::NATURE:ChildOf:CWE ID:1021:VIEW ID:1000:ORDINAL:Primary";
        let got = parse_related(Some(raw), RefKind::Cwe);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].target_key, "CWE-1021");
        assert_eq!(got[0].rel_label, "CHILDOF");
    }

    #[test]
    fn partial_related_entries_contribute_nothing() {
        // Missing NATURE, missing id, and non-numeric id respectively.
        let raw = "CWE ID:79::NATURE:ChildOf::NATURE:PeerOf:CWE ID:abc";
        assert!(parse_related(Some(raw), RefKind::Cwe).is_empty());
    }

    #[test]
    fn taxonomy_filter_keeps_only_the_target_taxonomy() {
        let raw = "::TAXONOMY NAME:ATTACK:ENTRY ID:1059:ENTRY NAME:Command \
                   and Scripting Interpreter::TAXONOMY NAME:OWASP Attacks:\
                   ENTRY NAME:Code Injection";
        assert_eq!(attack_entry_ids(Some(raw)), vec!["T1059"]);
    }

    #[test]
    fn taxonomy_filter_requires_exact_name_match() {
        let raw = "TAXONOMY NAME:ATTACKISH:ENTRY ID:1000";
        assert!(attack_entry_ids(Some(raw)).is_empty());
    }

    #[test]
    fn subtechnique_entry_ids_keep_the_dotted_suffix() {
        let raw = "TAXONOMY NAME:ATTACK:ENTRY ID:1548.004:ENTRY NAME:Abuse";
        assert_eq!(attack_entry_ids(Some(raw)), vec!["T1548.004"]);
    }

    #[test]
    fn rel_label_normalization_examples() {
        assert_eq!(normalize_rel_label("ChildOf"), "CHILDOF");
        assert_eq!(normalize_rel_label("Can Follow"), "CAN_FOLLOW");
        assert_eq!(normalize_rel_label("  peer-of "), "PEER_OF");
    }

    proptest! {
        /// Normalized labels are always usable as relationship-type tokens.
        #[test]
        fn normalized_labels_are_allow_listed(raw in ".*") {
            let label = normalize_rel_label(&raw);
            prop_assert!(label
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'));
        }

        /// Decoders never panic on arbitrary input.
        #[test]
        fn decoders_tolerate_arbitrary_input(raw in ".*") {
            let _ = parse_list(Some(&raw));
            let _ = parse_scalar_list(Some(&raw));
            let _ = parse_related(Some(&raw), RefKind::Cwe);
            let _ = parse_related(Some(&raw), RefKind::Capec);
            let _ = attack_entry_ids(Some(&raw));
        }

        /// Every decoded related entry carries the requested key prefix and a
        /// numeric id.
        #[test]
        fn related_targets_carry_canonical_prefix(raw in ".*") {
            for r in parse_related(Some(&raw), RefKind::Capec) {
                prop_assert!(r.target_key.starts_with("CAPEC-"));
                prop_assert!(r.target_key["CAPEC-".len()..]
                    .bytes()
                    .all(|b| b.is_ascii_digit()));
            }
        }
    }
}
