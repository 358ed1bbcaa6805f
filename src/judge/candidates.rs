//! Deny-list candidate derivation from manufacturer names.
//!
//! When the oracle rules a record unrelated, its manufacturer becomes a
//! candidate deny-list term: legal suffixes stripped, too-short names
//! dropped, known skin-device brands exempted so a future related record
//! from the same maker is never fast-pathed away.

/// Company suffixes stripped before a name becomes a candidate term.
const LEGAL_SUFFIXES: &[&str] = &[
    " inc.", " inc", " llc", " l.l.c.", " l.l.c", " ltd.", " ltd", " co.",
    " co", " corporation", " corp.", " corp", " limited", " gmbh",
];

/// Minimum candidate length after cleaning.
const MIN_TERM_LEN: usize = 3;

/// Strip legal suffixes and whitespace. Returns None when the remainder is
/// too short to be a useful term.
pub fn clean_manufacturer_name(name: &str) -> Option<String> {
    let mut cleaned = name.trim().to_string();
    if cleaned.is_empty() {
        return None;
    }

    loop {
        let lower = cleaned.to_lowercase();
        let Some(suffix) = LEGAL_SUFFIXES.iter().find(|s| lower.ends_with(*s)) else {
            break;
        };
        let cut = cleaned.len() - suffix.len();
        if !cleaned.is_char_boundary(cut) {
            break;
        }
        cleaned.truncate(cut);
        cleaned = cleaned.trim_end().to_string();
    }

    if cleaned.chars().count() < MIN_TERM_LEN {
        return None;
    }
    Some(cleaned)
}

/// True when the name contains a known skin-device brand.
pub fn is_allowed_brand(name: &str, allow_list: &[String]) -> bool {
    if name.is_empty() {
        return false;
    }
    let lower = name.to_lowercase();
    allow_list.iter().any(|brand| lower.contains(&brand.to_lowercase()))
}

/// Derive deny-list candidates from a manufacturer name. At most one
/// candidate per record; empty when the name cleans away or is allow-listed.
pub fn derive_candidates(manufacturer: &str, allow_list: &[String]) -> Vec<String> {
    let Some(cleaned) = clean_manufacturer_name(manufacturer) else {
        return Vec::new();
    };
    if is_allowed_brand(&cleaned, allow_list) {
        return Vec::new();
    }
    vec![cleaned]
}
