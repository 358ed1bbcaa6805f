//! Pending judgment queue: staging, listing, confirm/reject, expiry.
//!
//! Confirmation is transactional: the judgment's PENDING status is
//! re-validated inside the transaction, the record mutation and the status
//! flip commit together or not at all.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use super::engine::Judgment;
use super::strategy::{format_decision_remark, StrategyRegistry};
use super::types::{
    now_utc_string, Decision, DecisionSource, BatchConfirmOutcome, JudgmentStatus,
    PendingJudgment, RecordKind, RegulatoryRecord, RiskLevel, TIME_FORMAT,
};
use super::JudgeError;

pub struct PendingJudgmentStore;

impl PendingJudgmentStore {
    /// Stage a judgment for review instead of mutating the record.
    pub fn stage(
        conn: &Connection,
        record: &RegulatoryRecord,
        judgment: &Judgment,
        module_type: &str,
        expiry_days: i64,
    ) -> Result<PendingJudgment, JudgeError> {
        let decision = &judgment.decision;
        let now = Utc::now();
        let pending = PendingJudgment {
            id: Uuid::new_v4().to_string(),
            module_type: module_type.to_string(),
            record_kind: record.kind,
            record_id: record.id,
            decision: decision.clone(),
            suggested_risk_level: if decision.is_related {
                RiskLevel::High
            } else {
                RiskLevel::Low
            },
            suggested_remark: format_decision_remark(decision),
            denylist_candidates: judgment.denylist_candidates.clone(),
            denied_by_denylist: decision.source == DecisionSource::DenyList,
            status: JudgmentStatus::Pending,
            created_time: now.format(TIME_FORMAT).to_string(),
            expire_time: (now + Duration::days(expiry_days)).format(TIME_FORMAT).to_string(),
            reviewed_time: None,
            reviewed_by: None,
        };

        conn.execute(
            "INSERT INTO pending_judgments
             (id, module_type, record_kind, record_id, decision, suggested_risk_level,
              suggested_remark, denylist_candidates, denied_by_denylist, status,
              created_time, expire_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                pending.id,
                pending.module_type,
                pending.record_kind.as_str(),
                pending.record_id,
                serde_json::to_string(&pending.decision)?,
                pending.suggested_risk_level.as_str(),
                pending.suggested_remark,
                serde_json::to_string(&pending.denylist_candidates)?,
                pending.denied_by_denylist,
                pending.status.as_str(),
                pending.created_time,
                pending.expire_time,
            ],
        )?;
        Ok(pending)
    }

    pub fn get(conn: &Connection, id: &str) -> Result<PendingJudgment, JudgeError> {
        let raw = conn
            .query_row(
                "SELECT id, module_type, record_kind, record_id, decision,
                        suggested_risk_level, suggested_remark, denylist_candidates,
                        denied_by_denylist, status, created_time, expire_time,
                        reviewed_time, reviewed_by
                 FROM pending_judgments WHERE id = ?1",
                [id],
                Self::raw_from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    JudgeError::JudgmentNotFound(id.to_string())
                }
                other => other.into(),
            })?;
        raw.into_judgment()
    }

    /// List judgments for a module, newest first. Status defaults to PENDING.
    pub fn list(
        conn: &Connection,
        module_type: &str,
        status: Option<JudgmentStatus>,
        limit: u32,
    ) -> Result<Vec<PendingJudgment>, JudgeError> {
        let status = status.unwrap_or(JudgmentStatus::Pending);
        let mut stmt = conn.prepare(
            "SELECT id, module_type, record_kind, record_id, decision,
                    suggested_risk_level, suggested_remark, denylist_candidates,
                    denied_by_denylist, status, created_time, expire_time,
                    reviewed_time, reviewed_by
             FROM pending_judgments
             WHERE module_type = ?1 AND status = ?2
             ORDER BY created_time DESC, id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![module_type, status.as_str(), limit],
            Self::raw_from_row,
        )?;

        let mut judgments = Vec::new();
        for raw in rows {
            judgments.push(raw?.into_judgment()?);
        }
        Ok(judgments)
    }

    pub fn pending_count(conn: &Connection, module_type: &str) -> Result<u32, JudgeError> {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM pending_judgments
             WHERE module_type = ?1 AND status = 'PENDING'",
            [module_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Pending counts broken down by record kind.
    pub fn pending_count_by_kind(
        conn: &Connection,
        module_type: &str,
    ) -> Result<Vec<(RecordKind, u32)>, JudgeError> {
        let mut stmt = conn.prepare(
            "SELECT record_kind, COUNT(*) FROM pending_judgments
             WHERE module_type = ?1 AND status = 'PENDING'
             GROUP BY record_kind ORDER BY record_kind",
        )?;
        let rows = stmt.query_map([module_type], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (kind_str, count) = row?;
            let kind = RecordKind::from_str(&kind_str).ok_or_else(|| {
                crate::db::DatabaseError::InvalidEnum {
                    field: "record_kind".to_string(),
                    value: kind_str,
                }
            })?;
            counts.push((kind, count));
        }
        Ok(counts)
    }

    /// Expire unreviewed PENDING judgments whose expire_time passed.
    /// Returns the number of judgments expired.
    pub fn sweep_expired(conn: &Connection, now: DateTime<Utc>) -> Result<u32, JudgeError> {
        let cutoff = now.format(TIME_FORMAT).to_string();
        let swept = conn.execute(
            "UPDATE pending_judgments SET status = 'EXPIRED', reviewed_time = ?1
             WHERE status = 'PENDING' AND expire_time < ?1",
            [cutoff],
        )?;
        if swept > 0 {
            info!(count = swept, "Expired unreviewed judgments");
        }
        Ok(swept as u32)
    }

    fn raw_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawJudgmentRow> {
        Ok(RawJudgmentRow {
            id: row.get(0)?,
            module_type: row.get(1)?,
            record_kind: row.get(2)?,
            record_id: row.get(3)?,
            decision: row.get(4)?,
            suggested_risk_level: row.get(5)?,
            suggested_remark: row.get(6)?,
            denylist_candidates: row.get(7)?,
            denied_by_denylist: row.get(8)?,
            status: row.get(9)?,
            created_time: row.get(10)?,
            expire_time: row.get(11)?,
            reviewed_time: row.get(12)?,
            reviewed_by: row.get(13)?,
        })
    }
}

struct RawJudgmentRow {
    id: String,
    module_type: String,
    record_kind: String,
    record_id: i64,
    decision: String,
    suggested_risk_level: String,
    suggested_remark: String,
    denylist_candidates: Option<String>,
    denied_by_denylist: bool,
    status: String,
    created_time: String,
    expire_time: String,
    reviewed_time: Option<String>,
    reviewed_by: Option<String>,
}

impl RawJudgmentRow {
    fn into_judgment(self) -> Result<PendingJudgment, JudgeError> {
        let record_kind = RecordKind::from_str(&self.record_kind).ok_or_else(|| {
            crate::db::DatabaseError::InvalidEnum {
                field: "record_kind".to_string(),
                value: self.record_kind.clone(),
            }
        })?;
        let suggested_risk_level =
            RiskLevel::from_str(&self.suggested_risk_level).ok_or_else(|| {
                crate::db::DatabaseError::InvalidEnum {
                    field: "suggested_risk_level".to_string(),
                    value: self.suggested_risk_level.clone(),
                }
            })?;
        let status = JudgmentStatus::from_str(&self.status).ok_or_else(|| {
            crate::db::DatabaseError::InvalidEnum {
                field: "status".to_string(),
                value: self.status.clone(),
            }
        })?;
        let decision: Decision = serde_json::from_str(&self.decision)?;
        let denylist_candidates: Vec<String> = match self.denylist_candidates.as_deref() {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        };

        Ok(PendingJudgment {
            id: self.id,
            module_type: self.module_type,
            record_kind,
            record_id: self.record_id,
            decision,
            suggested_risk_level,
            suggested_remark: self.suggested_remark,
            denylist_candidates,
            denied_by_denylist: self.denied_by_denylist,
            status,
            created_time: self.created_time,
            expire_time: self.expire_time,
            reviewed_time: self.reviewed_time,
            reviewed_by: self.reviewed_by,
        })
    }
}

/// Human review operations over the pending judgment queue.
pub struct ReviewController {
    registry: StrategyRegistry,
}

impl ReviewController {
    pub fn new() -> Self {
        Self {
            registry: StrategyRegistry::new(),
        }
    }

    /// Confirm a pending judgment: apply the staged decision to the record
    /// and flip the judgment to CONFIRMED, atomically.
    pub fn confirm(&self, conn: &Connection, id: &str, reviewer: &str) -> Result<(), JudgeError> {
        let tx = conn.unchecked_transaction()?;

        let judgment = PendingJudgmentStore::get(&tx, id)?;
        if judgment.status != JudgmentStatus::Pending {
            return Err(JudgeError::StateConflict {
                id: id.to_string(),
                status: judgment.status.to_string(),
            });
        }
        if judgment.expire_time < now_utc_string() {
            return Err(JudgeError::StateConflict {
                id: id.to_string(),
                status: JudgmentStatus::Expired.to_string(),
            });
        }

        let strategy = self.registry.get(judgment.record_kind)?;
        let mut record = strategy.find_by_id(&tx, judgment.record_id)?;
        strategy.apply_decision(&mut record, &judgment.decision);
        strategy.persist(&tx, &record)?;

        let flipped = tx.execute(
            "UPDATE pending_judgments
             SET status = 'CONFIRMED', reviewed_time = ?1, reviewed_by = ?2
             WHERE id = ?3 AND status = 'PENDING'",
            rusqlite::params![now_utc_string(), reviewer, id],
        )?;
        if flipped == 0 {
            return Err(JudgeError::StateConflict {
                id: id.to_string(),
                status: "not PENDING".to_string(),
            });
        }
        tx.commit()?;

        info!(judgment_id = %id, kind = %judgment.record_kind, record_id = judgment.record_id,
              reviewer, "Judgment confirmed");
        Ok(())
    }

    /// Reject a pending judgment. The record stays untouched.
    pub fn reject(&self, conn: &Connection, id: &str, reviewer: &str) -> Result<(), JudgeError> {
        let tx = conn.unchecked_transaction()?;

        let judgment = PendingJudgmentStore::get(&tx, id)?;
        if judgment.status != JudgmentStatus::Pending {
            return Err(JudgeError::StateConflict {
                id: id.to_string(),
                status: judgment.status.to_string(),
            });
        }

        tx.execute(
            "UPDATE pending_judgments
             SET status = 'REJECTED', reviewed_time = ?1, reviewed_by = ?2
             WHERE id = ?3 AND status = 'PENDING'",
            rusqlite::params![now_utc_string(), reviewer, id],
        )?;
        tx.commit()?;

        info!(judgment_id = %id, reviewer, "Judgment rejected");
        Ok(())
    }

    /// Confirm a batch of judgments, isolating per-id failures.
    pub fn batch_confirm(
        &self,
        conn: &Connection,
        ids: &[String],
        reviewer: &str,
    ) -> BatchConfirmOutcome {
        let mut outcome = BatchConfirmOutcome {
            total: ids.len(),
            success_count: 0,
            failed_count: 0,
            errors: Vec::new(),
        };

        for id in ids {
            match self.confirm(conn, id, reviewer) {
                Ok(()) => outcome.success_count += 1,
                Err(e) => {
                    warn!(judgment_id = %id, error = %e, "Batch confirm item failed");
                    outcome.failed_count += 1;
                    outcome.errors.push(format!("{id}: {e}"));
                }
            }
        }
        outcome
    }

    /// Expire overdue judgments; thin wrapper kept here so callers can run
    /// review operations through one handle.
    pub fn sweep_expired(&self, conn: &Connection, now: DateTime<Utc>) -> Result<u32, JudgeError> {
        PendingJudgmentStore::sweep_expired(conn, now)
    }
}

impl Default for ReviewController {
    fn default() -> Self {
        Self::new()
    }
}
