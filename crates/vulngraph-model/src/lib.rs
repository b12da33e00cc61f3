//! Typed records for every source file shape vulngraph consumes, plus the
//! identifier normalizer that maps each source's raw id representation onto
//! the canonical per-type key.
//!
//! Each source is deliberately modeled as an explicit record with named,
//! optional fields rather than a free-form map: absent is `None`, never an
//! empty-string sentinel. Records tolerate unknown fields (the catalogs gain
//! columns between releases) and loosely typed ids (CSV-derived JSON carries
//! numbers as strings, sometimes with a leading apostrophe from spreadsheet
//! escaping).

pub mod ids;
pub mod records;
pub mod vocab;

pub use ids::{capec_key, cve_key, cwe_key, technique_key};
