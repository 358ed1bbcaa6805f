//! Deny-list fast path: case-insensitive substring matching over record
//! fields, plus the SQLite store the list is loaded from.
//!
//! Matching is field-major: every term is tried against `name` before any
//! term is tried against `manufacturer`, then `description`. Within a field,
//! terms match in insertion order. A hit short-circuits the oracle entirely.

use rusqlite::Connection;
use tracing::{debug, info};

use super::types::now_utc_string;
use super::JudgeError;

/// An in-memory snapshot of the enabled deny-list terms, in insertion order.
#[derive(Debug, Clone)]
pub struct DenyList {
    terms: Vec<String>,
}

impl DenyList {
    pub fn new(terms: Vec<String>) -> Self {
        Self { terms }
    }

    pub fn empty() -> Self {
        Self { terms: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Match fields in priority order (name > manufacturer > description).
    /// Returns the first matching term, as stored.
    pub fn match_fields(
        &self,
        name: &str,
        manufacturer: &str,
        description: &str,
    ) -> Option<&str> {
        if self.terms.is_empty() {
            return None;
        }
        for field in [name, manufacturer, description] {
            if field.is_empty() {
                continue;
            }
            let field_lower = field.to_lowercase();
            for term in &self.terms {
                if field_lower.contains(&term.to_lowercase()) {
                    return Some(term);
                }
            }
        }
        None
    }
}

/// SQLite-backed deny-list persistence.
pub struct DenyListStore;

impl DenyListStore {
    /// Load enabled terms in insertion order.
    pub fn load_enabled(conn: &Connection) -> Result<DenyList, JudgeError> {
        let mut stmt = conn.prepare(
            "SELECT term FROM deny_list_terms WHERE enabled = 1 ORDER BY id ASC",
        )?;
        let terms = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = terms.len(), "Loaded deny list");
        Ok(DenyList::new(terms))
    }

    /// Add a term if not already present (case-insensitive). Returns true
    /// if the term was inserted.
    pub fn add_term(conn: &Connection, term: &str) -> Result<bool, JudgeError> {
        let trimmed = term.trim();
        if trimmed.is_empty() {
            return Ok(false);
        }
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO deny_list_terms (term, enabled, created_at)
             VALUES (?1, 1, ?2)",
            rusqlite::params![trimmed, now_utc_string()],
        )?;
        Ok(inserted > 0)
    }

    /// Add a batch of terms in one transaction. Duplicates are skipped.
    /// Returns the number of terms actually inserted.
    pub fn bulk_add(conn: &Connection, terms: &[String]) -> Result<u32, JudgeError> {
        if terms.is_empty() {
            return Ok(0);
        }
        let tx = conn.unchecked_transaction()?;
        let mut added = 0u32;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO deny_list_terms (term, enabled, created_at)
                 VALUES (?1, 1, ?2)",
            )?;
            let now = now_utc_string();
            for term in terms {
                let trimmed = term.trim();
                if trimmed.is_empty() {
                    continue;
                }
                added += stmt.execute(rusqlite::params![trimmed, now])? as u32;
            }
        }
        tx.commit()?;
        if added > 0 {
            info!(added, skipped = terms.len() as u32 - added, "Deny list grown");
        }
        Ok(added)
    }

    /// Enable or disable a term without deleting it. Returns true if a row
    /// was updated.
    pub fn set_enabled(conn: &Connection, term: &str, enabled: bool) -> Result<bool, JudgeError> {
        let updated = conn.execute(
            "UPDATE deny_list_terms SET enabled = ?1 WHERE term = ?2 COLLATE NOCASE",
            rusqlite::params![enabled, term.trim()],
        )?;
        Ok(updated > 0)
    }
}
