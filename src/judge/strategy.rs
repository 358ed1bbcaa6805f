//! Per-kind record access behind the `RecordStrategy` seam.
//!
//! Every record kind lives in its own table with its own column names, but
//! the judge only ever needs a name, a manufacturer and a description. One
//! `TableStrategy` implementation covers all six kinds, parameterized by a
//! static `RecordMapping`; the trait stays object-safe so the registry can
//! hand out `&dyn RecordStrategy`.

use rusqlite::Connection;

use super::types::{
    now_utc_string, ClassificationInput, Decision, RecordKind, RegulatoryRecord, RiskLevel,
    TaskScope,
};
use super::JudgeError;

/// Column mapping from a kind table to the normalized record view.
#[derive(Debug, Clone, Copy)]
pub struct RecordMapping {
    pub kind: RecordKind,
    pub table: &'static str,
    pub name_col: &'static str,
    pub manufacturer_col: &'static str,
    pub description_col: &'static str,
}

pub const RECORD_MAPPINGS: &[RecordMapping] = &[
    RecordMapping {
        kind: RecordKind::Registration,
        table: "device_registrations",
        name_col: "device_name",
        manufacturer_col: "manufacturer_name",
        description_col: "device_description",
    },
    RecordMapping {
        kind: RecordKind::Application,
        table: "device_applications",
        name_col: "device_name",
        manufacturer_col: "applicant",
        description_col: "statement_summary",
    },
    RecordMapping {
        kind: RecordKind::Recall,
        table: "device_recalls",
        name_col: "product_description",
        manufacturer_col: "recalling_firm",
        description_col: "reason_for_recall",
    },
    RecordMapping {
        kind: RecordKind::AdverseEvent,
        table: "adverse_event_reports",
        name_col: "brand_name",
        manufacturer_col: "manufacturer_name",
        description_col: "event_description",
    },
    RecordMapping {
        kind: RecordKind::Guidance,
        table: "guidance_documents",
        name_col: "title",
        manufacturer_col: "issuing_agency",
        description_col: "summary",
    },
    RecordMapping {
        kind: RecordKind::CustomsRuling,
        table: "customs_rulings",
        name_col: "ruling_title",
        manufacturer_col: "importer_name",
        description_col: "ruling_description",
    },
];

/// Seam for per-kind record access. Object-safe so the registry can store
/// heterogeneous strategies.
pub trait RecordStrategy: Send + Sync {
    fn kind(&self) -> RecordKind;

    fn find_by_id(&self, conn: &Connection, id: i64) -> Result<RegulatoryRecord, JudgeError>;

    /// Load records matching the task scope, ordered by id.
    fn fetch_scope(
        &self,
        conn: &Connection,
        scope: &TaskScope,
    ) -> Result<Vec<RegulatoryRecord>, JudgeError>;

    fn to_classification_input(&self, record: &RegulatoryRecord) -> ClassificationInput;

    /// Apply a decision in memory: risk level and remark.
    fn apply_decision(&self, record: &mut RegulatoryRecord, decision: &Decision);

    /// Write risk level and remark back in a single statement.
    fn persist(&self, conn: &Connection, record: &RegulatoryRecord) -> Result<(), JudgeError>;
}

/// Human-readable remark block appended to a record when a decision lands.
pub fn format_decision_remark(decision: &Decision) -> String {
    let mut remark = String::from("[ai-judgment]\n");
    remark.push_str(&format!(
        "verdict: {}\n",
        if decision.is_related { "related" } else { "not related" }
    ));
    remark.push_str(&format!("source: {}\n", decision.source.as_str()));
    remark.push_str(&format!("confidence: {:.1}%\n", decision.confidence * 100.0));
    remark.push_str(&format!("reason: {}\n", decision.reason));
    if !decision.category.is_empty() {
        remark.push_str(&format!("category: {}\n", decision.category));
    }
    remark.push_str(&format!("judged at: {}\n", now_utc_string()));
    remark.push_str(if decision.is_related {
        "action: risk level kept"
    } else {
        "action: risk level set to LOW"
    });
    remark
}

/// Generic strategy over one kind table.
pub struct TableStrategy {
    mapping: &'static RecordMapping,
}

impl TableStrategy {
    pub fn new(mapping: &'static RecordMapping) -> Self {
        Self { mapping }
    }

    fn record_from_row(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecordRow> {
        Ok(RawRecordRow {
            id: row.get(0)?,
            name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            manufacturer: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            country: row.get(4)?,
            risk_level: row.get(5)?,
            remark: row.get(6)?,
        })
    }

    fn into_record(&self, raw: RawRecordRow) -> Result<RegulatoryRecord, JudgeError> {
        let risk_level = RiskLevel::from_str(&raw.risk_level).ok_or_else(|| {
            crate::db::DatabaseError::InvalidEnum {
                field: "risk_level".to_string(),
                value: raw.risk_level.clone(),
            }
        })?;
        Ok(RegulatoryRecord {
            id: raw.id,
            kind: self.mapping.kind,
            name: raw.name,
            manufacturer: raw.manufacturer,
            description: raw.description,
            country: raw.country,
            risk_level,
            remark: raw.remark,
        })
    }

    fn select_clause(&self) -> String {
        format!(
            "SELECT id, {}, {}, {}, country, risk_level, remark FROM {}",
            self.mapping.name_col,
            self.mapping.manufacturer_col,
            self.mapping.description_col,
            self.mapping.table
        )
    }
}

struct RawRecordRow {
    id: i64,
    name: String,
    manufacturer: String,
    description: String,
    country: Option<String>,
    risk_level: String,
    remark: Option<String>,
}

impl RecordStrategy for TableStrategy {
    fn kind(&self) -> RecordKind {
        self.mapping.kind
    }

    fn find_by_id(&self, conn: &Connection, id: i64) -> Result<RegulatoryRecord, JudgeError> {
        let sql = format!("{} WHERE id = ?1", self.select_clause());
        let raw = conn
            .query_row(&sql, [id], |row| self.record_from_row(row))
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => JudgeError::RecordNotFound {
                    kind: self.mapping.kind,
                    id,
                },
                other => other.into(),
            })?;
        self.into_record(raw)
    }

    fn fetch_scope(
        &self,
        conn: &Connection,
        scope: &TaskScope,
    ) -> Result<Vec<RegulatoryRecord>, JudgeError> {
        let risk = scope.risk_level.unwrap_or(RiskLevel::High);
        let limit: i64 = scope.limit.map(|l| l as i64).unwrap_or(-1);
        let sql = format!(
            "{} WHERE risk_level = ?1 AND (?2 IS NULL OR country = ?2)
             ORDER BY id ASC LIMIT ?3",
            self.select_clause()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![risk.as_str(), scope.country, limit],
            |row| self.record_from_row(row),
        )?;

        let mut records = Vec::new();
        for raw in rows {
            records.push(self.into_record(raw?)?);
        }
        Ok(records)
    }

    fn to_classification_input(&self, record: &RegulatoryRecord) -> ClassificationInput {
        ClassificationInput::from_record(record)
    }

    fn apply_decision(&self, record: &mut RegulatoryRecord, decision: &Decision) {
        if !decision.is_related {
            record.risk_level = RiskLevel::Low;
        }
        let block = format_decision_remark(decision);
        record.remark = Some(match record.remark.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n\n{block}"),
            _ => block,
        });
    }

    fn persist(&self, conn: &Connection, record: &RegulatoryRecord) -> Result<(), JudgeError> {
        let sql = format!(
            "UPDATE {} SET risk_level = ?1, remark = ?2 WHERE id = ?3",
            self.mapping.table
        );
        let updated = conn.execute(
            &sql,
            rusqlite::params![record.risk_level.as_str(), record.remark, record.id],
        )?;
        if updated == 0 {
            return Err(JudgeError::RecordNotFound {
                kind: self.mapping.kind,
                id: record.id,
            });
        }
        Ok(())
    }
}

/// Registry of one strategy per record kind.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn RecordStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        let strategies = RECORD_MAPPINGS
            .iter()
            .map(|m| Box::new(TableStrategy::new(m)) as Box<dyn RecordStrategy>)
            .collect();
        Self { strategies }
    }

    pub fn get(&self, kind: RecordKind) -> Result<&dyn RecordStrategy, JudgeError> {
        self.strategies
            .iter()
            .find(|s| s.kind() == kind)
            .map(|s| s.as_ref())
            .ok_or_else(|| JudgeError::UnknownRecordKind(kind.as_str().to_string()))
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::judge::types::DecisionSource;

    fn seed_registration(conn: &Connection, name: &str, manufacturer: &str) -> i64 {
        conn.execute(
            "INSERT INTO device_registrations (device_name, manufacturer_name, device_description, country)
             VALUES (?1, ?2, 'desc', 'US')",
            rusqlite::params![name, manufacturer],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn related_decision() -> Decision {
        Decision {
            is_related: true,
            confidence: 0.9,
            reason: "skin imaging".to_string(),
            category: "imaging".to_string(),
            extracted_keywords: Vec::new(),
            source: DecisionSource::Oracle,
            fail_closed: false,
        }
    }

    #[test]
    fn registry_covers_all_kinds() {
        let registry = StrategyRegistry::new();
        for kind in RecordKind::all() {
            assert!(registry.get(*kind).is_ok(), "missing strategy for {kind}");
        }
    }

    #[test]
    fn find_by_id_maps_columns() {
        let conn = open_memory_database().unwrap();
        let id = seed_registration(&conn, "VISIA Analyzer", "Canfield Scientific");
        let registry = StrategyRegistry::new();
        let strategy = registry.get(RecordKind::Registration).unwrap();
        let record = strategy.find_by_id(&conn, id).unwrap();
        assert_eq!(record.name, "VISIA Analyzer");
        assert_eq!(record.manufacturer, "Canfield Scientific");
        assert_eq!(record.description, "desc");
        assert_eq!(record.risk_level, RiskLevel::High);
    }

    #[test]
    fn find_by_id_missing_record() {
        let conn = open_memory_database().unwrap();
        let registry = StrategyRegistry::new();
        let strategy = registry.get(RecordKind::Recall).unwrap();
        let err = strategy.find_by_id(&conn, 999).unwrap_err();
        assert!(matches!(err, JudgeError::RecordNotFound { id: 999, .. }));
    }

    #[test]
    fn null_text_columns_become_empty_strings() {
        let conn = open_memory_database().unwrap();
        conn.execute("INSERT INTO device_recalls (country) VALUES ('DE')", [])
            .unwrap();
        let id = conn.last_insert_rowid();
        let registry = StrategyRegistry::new();
        let strategy = registry.get(RecordKind::Recall).unwrap();
        let record = strategy.find_by_id(&conn, id).unwrap();
        assert!(record.name.is_empty());
        assert!(record.manufacturer.is_empty());
        assert!(record.description.is_empty());
    }

    #[test]
    fn fetch_scope_filters_high_risk_only() {
        let conn = open_memory_database().unwrap();
        seed_registration(&conn, "a", "m");
        let low_id = seed_registration(&conn, "b", "m");
        conn.execute(
            "UPDATE device_registrations SET risk_level = 'LOW' WHERE id = ?1",
            [low_id],
        )
        .unwrap();
        let registry = StrategyRegistry::new();
        let strategy = registry.get(RecordKind::Registration).unwrap();
        let records = strategy.fetch_scope(&conn, &TaskScope::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "a");
    }

    #[test]
    fn fetch_scope_filters_country() {
        let conn = open_memory_database().unwrap();
        seed_registration(&conn, "us-record", "m");
        conn.execute(
            "INSERT INTO device_registrations (device_name, country) VALUES ('de-record', 'DE')",
            [],
        )
        .unwrap();
        let registry = StrategyRegistry::new();
        let strategy = registry.get(RecordKind::Registration).unwrap();
        let scope = TaskScope {
            country: Some("DE".to_string()),
            ..Default::default()
        };
        let records = strategy.fetch_scope(&conn, &scope).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "de-record");
    }

    #[test]
    fn fetch_scope_respects_limit_and_order() {
        let conn = open_memory_database().unwrap();
        for i in 0..5 {
            seed_registration(&conn, &format!("r{i}"), "m");
        }
        let registry = StrategyRegistry::new();
        let strategy = registry.get(RecordKind::Registration).unwrap();
        let scope = TaskScope {
            limit: Some(3),
            ..Default::default()
        };
        let records = strategy.fetch_scope(&conn, &scope).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "r0");
        assert_eq!(records[2].name, "r2");
    }

    #[test]
    fn apply_related_keeps_risk_level() {
        let registry = StrategyRegistry::new();
        let strategy = registry.get(RecordKind::Registration).unwrap();
        let mut record = RegulatoryRecord {
            id: 1,
            kind: RecordKind::Registration,
            name: "n".to_string(),
            manufacturer: "m".to_string(),
            description: "d".to_string(),
            country: None,
            risk_level: RiskLevel::High,
            remark: None,
        };
        strategy.apply_decision(&mut record, &related_decision());
        assert_eq!(record.risk_level, RiskLevel::High);
        let remark = record.remark.unwrap();
        assert!(remark.contains("verdict: related"));
        assert!(remark.contains("confidence: 90.0%"));
        assert!(remark.contains("action: risk level kept"));
    }

    #[test]
    fn apply_unrelated_downgrades_and_appends_remark() {
        let registry = StrategyRegistry::new();
        let strategy = registry.get(RecordKind::Registration).unwrap();
        let mut record = RegulatoryRecord {
            id: 1,
            kind: RecordKind::Registration,
            name: "n".to_string(),
            manufacturer: "m".to_string(),
            description: "d".to_string(),
            country: None,
            risk_level: RiskLevel::High,
            remark: Some("manually flagged".to_string()),
        };
        strategy.apply_decision(&mut record, &Decision::denylist_match("acme"));
        assert_eq!(record.risk_level, RiskLevel::Low);
        let remark = record.remark.unwrap();
        assert!(remark.starts_with("manually flagged\n\n"));
        assert!(remark.contains("source: DENYLIST"));
        assert!(remark.contains("action: risk level set to LOW"));
    }

    #[test]
    fn persist_writes_back_single_statement() {
        let conn = open_memory_database().unwrap();
        let id = seed_registration(&conn, "n", "Acme Imaging");
        let registry = StrategyRegistry::new();
        let strategy = registry.get(RecordKind::Registration).unwrap();
        let mut record = strategy.find_by_id(&conn, id).unwrap();
        strategy.apply_decision(&mut record, &Decision::denylist_match("acme"));
        strategy.persist(&conn, &record).unwrap();

        let reread = strategy.find_by_id(&conn, id).unwrap();
        assert_eq!(reread.risk_level, RiskLevel::Low);
        assert!(reread.remark.unwrap().contains("matched term: acme"));
    }

    #[test]
    fn persist_missing_record_errors() {
        let conn = open_memory_database().unwrap();
        let registry = StrategyRegistry::new();
        let strategy = registry.get(RecordKind::Guidance).unwrap();
        let record = RegulatoryRecord {
            id: 404,
            kind: RecordKind::Guidance,
            name: String::new(),
            manufacturer: String::new(),
            description: String::new(),
            country: None,
            risk_level: RiskLevel::Low,
            remark: None,
        };
        let err = strategy.persist(&conn, &record).unwrap_err();
        assert!(matches!(err, JudgeError::RecordNotFound { id: 404, .. }));
    }

    #[test]
    fn each_kind_reads_its_own_table() {
        let conn = open_memory_database().unwrap();
        conn.execute(
            "INSERT INTO adverse_event_reports (brand_name, manufacturer_name, event_description)
             VALUES ('OBSERV 520', 'Sylton', 'lamp failure')",
            [],
        )
        .unwrap();
        let id = conn.last_insert_rowid();
        let registry = StrategyRegistry::new();
        let strategy = registry.get(RecordKind::AdverseEvent).unwrap();
        let record = strategy.find_by_id(&conn, id).unwrap();
        assert_eq!(record.kind, RecordKind::AdverseEvent);
        assert_eq!(record.name, "OBSERV 520");
        assert_eq!(record.description, "lamp failure");
    }
}
