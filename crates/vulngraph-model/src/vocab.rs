//! Canonical label and relationship vocabulary.
//!
//! Every dynamic label or relationship type used in query construction must
//! come from this closed set (or from `normalize_rel_label`, whose output is
//! restricted to the same character class). Nothing here is derived from
//! unvalidated input.

/// Node labels with their uniqueness-constraint key property.
pub mod label {
    pub const CVE: &str = "CVE";
    pub const CWE: &str = "CWE";
    pub const CAPEC: &str = "CAPEC";
    pub const TTP: &str = "TTP";
    pub const TACTIC: &str = "Tactic";
    pub const KEV: &str = "KEV";
    pub const CONTAINER: &str = "Container";
    pub const METRIC: &str = "Metric";
    pub const REFERENCE: &str = "Reference";
    pub const PRODUCT: &str = "Product";
    pub const DESCRIPTION: &str = "Description";
    pub const PROBLEM_TYPE: &str = "ProblemType";
    pub const CONFIGURATION: &str = "Configuration";
    pub const IMPACT: &str = "Impact";
    pub const SOLUTION: &str = "Solution";
    pub const EXPLOIT: &str = "Exploit";
    pub const WORKAROUND: &str = "Workaround";
}

/// Key property per label. Composite-keyed sub-nodes use their first key
/// property here and carry the rest in the merge key map.
pub mod key {
    pub const CVE: &str = "cveId";
    pub const CWE: &str = "id";
    pub const CAPEC: &str = "id";
    pub const TTP: &str = "externalId";
    pub const TACTIC: &str = "name";
    pub const KEV: &str = "cveId";
    pub const METRIC: &str = "vectorString";
    pub const REFERENCE: &str = "url";
    pub const DESCRIBED: &str = "description";
}

/// Statically known relationship types. Data-derived CAPEC↔CAPEC natures
/// (`CHILDOF`, `PEEROF`, `CANFOLLOW`, ...) come from the taxonomy parser's
/// normalization instead.
pub mod rel {
    pub const RELATED_TO: &str = "RELATED_TO";
    pub const USES_TACTIC: &str = "USES_TACTIC";
    pub const HAS_TTP: &str = "HAS_TTP";
    pub const USES_TTP: &str = "USES_TTP";
    pub const HAS_CONTAINER: &str = "HAS_CONTAINER";
    pub const HAS_METRIC: &str = "HAS_METRIC";
    pub const HAS_REFERENCE: &str = "HAS_REFERENCE";
    pub const AFFECTS_PRODUCT: &str = "AFFECTS_PRODUCT";
    pub const HAS_DESCRIPTION: &str = "HAS_DESCRIPTION";
    pub const HAS_PROBLEM_TYPE: &str = "HAS_PROBLEM_TYPE";
    pub const HAS_CONFIGURATION: &str = "HAS_CONFIGURATION";
    pub const HAS_IMPACT: &str = "HAS_IMPACT";
    pub const HAS_SOLUTION: &str = "HAS_SOLUTION";
    pub const HAS_EXPLOIT: &str = "HAS_EXPLOIT";
    pub const HAS_WORKAROUND: &str = "HAS_WORKAROUND";
    pub const IS_EXPLOITED_IN: &str = "IS_EXPLOITED_IN";
    pub const HAS_CWE: &str = "HAS_CWE";
}

/// Property name carrying the semantic-index vector on embedded nodes.
pub const EMBEDDING_PROP: &str = "embedding";

/// Derived snapshot flag maintained by the KEV refresh pass.
pub const EXPLOITED_PROP: &str = "exploited";
