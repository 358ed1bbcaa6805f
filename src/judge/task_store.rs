//! Task persistence: rows, counters, lifecycle transitions, and the
//! persisted cancellation flag the runner polls.

use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use super::types::{now_utc_string, RecordKind, RiskLevel, Task, TaskScope, TaskStatus};
use super::JudgeError;

pub struct SqliteTaskStore;

impl SqliteTaskStore {
    /// Create a PENDING task for the given scope.
    pub fn create(conn: &Connection, scope: &TaskScope) -> Result<Task, JudgeError> {
        let task = Task {
            id: Uuid::new_v4().to_string(),
            scope: scope.clone(),
            status: TaskStatus::Pending,
            total_count: 0,
            processed_count: 0,
            related_count: 0,
            unrelated_count: 0,
            failed_count: 0,
            distinct_keyword_count: 0,
            start_time: None,
            end_time: None,
            error_message: None,
            created_at: now_utc_string(),
        };

        let record_kinds = scope
            .record_kinds
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT INTO judge_tasks
             (id, module_scope, record_kinds, country, risk_level, item_limit, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                task.id,
                scope.module_scope,
                record_kinds,
                scope.country,
                scope.risk_level.map(|r| r.as_str()),
                scope.limit,
                task.status.as_str(),
                task.created_at,
            ],
        )?;
        info!(task_id = %task.id, module = %scope.module_scope, "Task created");
        Ok(task)
    }

    /// Load a full task row.
    pub fn get(conn: &Connection, id: &str) -> Result<Task, JudgeError> {
        let raw = conn
            .query_row(
                "SELECT id, module_scope, record_kinds, country, risk_level, item_limit,
                        status, total_count, processed_count, related_count, unrelated_count,
                        failed_count, distinct_keyword_count, start_time, end_time,
                        error_message, created_at
                 FROM judge_tasks WHERE id = ?1",
                [id],
                |row| {
                    Ok(RawTaskRow {
                        id: row.get(0)?,
                        module_scope: row.get(1)?,
                        record_kinds: row.get(2)?,
                        country: row.get(3)?,
                        risk_level: row.get(4)?,
                        item_limit: row.get(5)?,
                        status: row.get(6)?,
                        total_count: row.get(7)?,
                        processed_count: row.get(8)?,
                        related_count: row.get(9)?,
                        unrelated_count: row.get(10)?,
                        failed_count: row.get(11)?,
                        distinct_keyword_count: row.get(12)?,
                        start_time: row.get(13)?,
                        end_time: row.get(14)?,
                        error_message: row.get(15)?,
                        created_at: row.get(16)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    JudgeError::TaskNotFound(id.to_string())
                }
                other => other.into(),
            })?;
        raw.into_task()
    }

    /// Light status re-read; the runner polls this once per item to observe
    /// external cancellation.
    pub fn status(conn: &Connection, id: &str) -> Result<TaskStatus, JudgeError> {
        let status: String = conn
            .query_row("SELECT status FROM judge_tasks WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    JudgeError::TaskNotFound(id.to_string())
                }
                other => other.into(),
            })?;
        TaskStatus::from_str(&status).ok_or_else(|| {
            crate::db::DatabaseError::InvalidEnum {
                field: "status".to_string(),
                value: status,
            }
            .into()
        })
    }

    /// Request cancellation of a PENDING or RUNNING task. Terminal tasks
    /// are left untouched. Returns true if the flag was set.
    pub fn cancel(conn: &Connection, id: &str) -> Result<bool, JudgeError> {
        let updated = conn.execute(
            "UPDATE judge_tasks SET status = 'CANCELLED'
             WHERE id = ?1 AND status IN ('PENDING', 'RUNNING')",
            [id],
        )?;
        if updated > 0 {
            info!(task_id = %id, "Task cancellation requested");
        }
        Ok(updated > 0)
    }

    pub fn mark_running(conn: &Connection, id: &str) -> Result<(), JudgeError> {
        conn.execute(
            "UPDATE judge_tasks SET status = 'RUNNING', start_time = ?1 WHERE id = ?2",
            rusqlite::params![now_utc_string(), id],
        )?;
        Ok(())
    }

    pub fn mark_completed(conn: &Connection, id: &str) -> Result<(), JudgeError> {
        conn.execute(
            "UPDATE judge_tasks SET status = 'COMPLETED', end_time = ?1 WHERE id = ?2",
            rusqlite::params![now_utc_string(), id],
        )?;
        Ok(())
    }

    pub fn mark_cancelled(conn: &Connection, id: &str) -> Result<(), JudgeError> {
        conn.execute(
            "UPDATE judge_tasks SET status = 'CANCELLED', end_time = ?1 WHERE id = ?2",
            rusqlite::params![now_utc_string(), id],
        )?;
        Ok(())
    }

    pub fn mark_failed(conn: &Connection, id: &str, error: &str) -> Result<(), JudgeError> {
        conn.execute(
            "UPDATE judge_tasks SET status = 'FAILED', error_message = ?1, end_time = ?2
             WHERE id = ?3",
            rusqlite::params![error, now_utc_string(), id],
        )?;
        Ok(())
    }

    /// Persist the in-memory counters of a task.
    pub fn update_counters(conn: &Connection, task: &Task) -> Result<(), JudgeError> {
        conn.execute(
            "UPDATE judge_tasks SET total_count = ?1, processed_count = ?2,
                    related_count = ?3, unrelated_count = ?4, failed_count = ?5,
                    distinct_keyword_count = ?6
             WHERE id = ?7",
            rusqlite::params![
                task.total_count,
                task.processed_count,
                task.related_count,
                task.unrelated_count,
                task.failed_count,
                task.distinct_keyword_count,
                task.id,
            ],
        )?;
        Ok(())
    }

    /// Startup sweep: any task still RUNNING lost its runner to a process
    /// restart and can never finish. Returns the number of tasks failed.
    pub fn recover_interrupted(conn: &Connection) -> Result<u32, JudgeError> {
        let swept = conn.execute(
            "UPDATE judge_tasks
             SET status = 'FAILED', error_message = 'interrupted: runner lost to restart',
                 end_time = ?1
             WHERE status = 'RUNNING'",
            [now_utc_string()],
        )?;
        if swept > 0 {
            warn!(count = swept, "Recovered interrupted tasks as FAILED");
        }
        Ok(swept as u32)
    }

    /// List tasks newest-first, optionally filtered by status.
    pub fn list(
        conn: &Connection,
        status: Option<TaskStatus>,
        limit: u32,
    ) -> Result<Vec<Task>, JudgeError> {
        let mut stmt = conn.prepare(
            "SELECT id FROM judge_tasks
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(
                rusqlite::params![status.map(|s| s.as_str()), limit],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        ids.iter().map(|id| Self::get(conn, id)).collect()
    }
}

struct RawTaskRow {
    id: String,
    module_scope: String,
    record_kinds: Option<String>,
    country: Option<String>,
    risk_level: Option<String>,
    item_limit: Option<u32>,
    status: String,
    total_count: u32,
    processed_count: u32,
    related_count: u32,
    unrelated_count: u32,
    failed_count: u32,
    distinct_keyword_count: u32,
    start_time: Option<String>,
    end_time: Option<String>,
    error_message: Option<String>,
    created_at: String,
}

impl RawTaskRow {
    fn into_task(self) -> Result<Task, JudgeError> {
        let status = TaskStatus::from_str(&self.status).ok_or_else(|| {
            crate::db::DatabaseError::InvalidEnum {
                field: "status".to_string(),
                value: self.status.clone(),
            }
        })?;
        let risk_level = match &self.risk_level {
            Some(s) => Some(RiskLevel::from_str(s).ok_or_else(|| {
                crate::db::DatabaseError::InvalidEnum {
                    field: "risk_level".to_string(),
                    value: s.clone(),
                }
            })?),
            None => None,
        };
        let record_kinds: Option<Vec<RecordKind>> = self
            .record_kinds
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Task {
            id: self.id,
            scope: TaskScope {
                module_scope: self.module_scope,
                record_kinds,
                country: self.country,
                risk_level,
                limit: self.item_limit,
            },
            status,
            total_count: self.total_count,
            processed_count: self.processed_count,
            related_count: self.related_count,
            unrelated_count: self.unrelated_count,
            failed_count: self.failed_count,
            distinct_keyword_count: self.distinct_keyword_count,
            start_time: self.start_time,
            end_time: self.end_time,
            error_message: self.error_message,
            created_at: self.created_at,
        })
    }
}
