//! Sequential batch loop for one judge task.
//!
//! Per item: cancellation check (persisted status re-read), deny-list /
//! oracle decision, apply or stage, counter bump. Counters are persisted
//! every `persist_interval` items followed by the pacing sleep; per-item
//! failures increment `failed_count` and never abort the task.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use super::denylist::DenyListStore;
use super::engine::DecisionEngine;
use super::oracle::OracleClient;
use super::review::PendingJudgmentStore;
use super::strategy::{RecordStrategy, StrategyRegistry};
use super::task_store::SqliteTaskStore;
use super::types::{JudgeConfig, JudgeMode, RecordKind, RegulatoryRecord, Task, TaskStatus};
use super::JudgeError;

enum RunOutcome {
    Completed,
    Cancelled,
}

pub struct TaskRunner {
    registry: StrategyRegistry,
    engine: DecisionEngine,
    config: JudgeConfig,
}

impl TaskRunner {
    pub fn new(oracle: Arc<dyn OracleClient>, config: JudgeConfig) -> Self {
        let engine = DecisionEngine::new(oracle, config.brand_allow_list.clone());
        Self {
            registry: StrategyRegistry::new(),
            engine,
            config,
        }
    }

    /// Run a PENDING task to a terminal state. Returns the final task row;
    /// setup failures land in the row as FAILED with an error message.
    pub fn run(&self, conn: &Connection, task_id: &str) -> Result<Task, JudgeError> {
        let mut task = SqliteTaskStore::get(conn, task_id)?;
        if task.status != TaskStatus::Pending {
            warn!(task_id, status = %task.status, "Task is not PENDING, refusing to run");
            return Ok(task);
        }

        SqliteTaskStore::mark_running(conn, task_id)?;
        task.status = TaskStatus::Running;
        info!(task_id, module = %task.scope.module_scope, "Task started");

        match self.process(conn, &mut task) {
            Ok(RunOutcome::Completed) => {
                SqliteTaskStore::mark_completed(conn, task_id)?;
                info!(
                    task_id,
                    processed = task.processed_count,
                    related = task.related_count,
                    unrelated = task.unrelated_count,
                    failed = task.failed_count,
                    "Task completed"
                );
            }
            Ok(RunOutcome::Cancelled) => {
                SqliteTaskStore::mark_cancelled(conn, task_id)?;
                info!(task_id, processed = task.processed_count, "Task cancelled");
            }
            Err(e) => {
                error!(task_id, error = %e, "Task failed");
                SqliteTaskStore::update_counters(conn, &task)?;
                SqliteTaskStore::mark_failed(conn, task_id, &e.to_string())?;
            }
        }

        SqliteTaskStore::get(conn, task_id)
    }

    fn process(&self, conn: &Connection, task: &mut Task) -> Result<RunOutcome, JudgeError> {
        let deny = DenyListStore::load_enabled(conn)?;
        let kinds: Vec<RecordKind> = task
            .scope
            .record_kinds
            .clone()
            .unwrap_or_else(|| RecordKind::all().to_vec());

        // Distinct candidate terms across the whole task, bulk-added at the end.
        let mut candidates: BTreeSet<String> = BTreeSet::new();

        for kind in kinds {
            if self.is_cancelled(conn, task)? {
                return Ok(RunOutcome::Cancelled);
            }

            let strategy = self.registry.get(kind)?;
            let records = strategy.fetch_scope(conn, &task.scope)?;
            if records.is_empty() {
                debug!(task_id = %task.id, %kind, "No records in scope");
                continue;
            }

            task.total_count += records.len() as u32;
            SqliteTaskStore::update_counters(conn, task)?;
            info!(task_id = %task.id, %kind, count = records.len(), "Judging records");

            for record in &records {
                if self.is_cancelled(conn, task)? {
                    return Ok(RunOutcome::Cancelled);
                }

                self.judge_one(conn, strategy, record, &deny, task, &mut candidates);
                task.processed_count += 1;

                if task.processed_count % self.config.persist_interval == 0 {
                    SqliteTaskStore::update_counters(conn, task)?;
                    debug!(
                        task_id = %task.id,
                        processed = task.processed_count,
                        total = task.total_count,
                        "Progress checkpoint"
                    );
                    std::thread::sleep(Duration::from_millis(self.config.pacing_delay_ms));
                }
            }

            SqliteTaskStore::update_counters(conn, task)?;
        }

        if !candidates.is_empty() {
            let terms: Vec<String> = candidates.into_iter().collect();
            let added = DenyListStore::bulk_add(conn, &terms)?;
            debug!(task_id = %task.id, added, "Bulk-added deny-list candidates");
        }
        SqliteTaskStore::update_counters(conn, task)?;
        Ok(RunOutcome::Completed)
    }

    /// Judge one record, folding the result into the task counters. Errors
    /// here are per-item failures by definition and never propagate.
    fn judge_one(
        &self,
        conn: &Connection,
        strategy: &dyn RecordStrategy,
        record: &RegulatoryRecord,
        deny: &super::denylist::DenyList,
        task: &mut Task,
        candidates: &mut BTreeSet<String>,
    ) {
        let input = strategy.to_classification_input(record);

        let judgment = match self.engine.decide(deny, &input) {
            Ok(judgment) => judgment,
            Err(e) => {
                warn!(kind = %record.kind, record_id = record.id, error = %e, "Oracle call failed");
                task.failed_count += 1;
                return;
            }
        };

        if judgment.decision.fail_closed {
            warn!(
                kind = %record.kind,
                record_id = record.id,
                reason = %judgment.decision.reason,
                "Verdict failed closed, not applying"
            );
            task.failed_count += 1;
            return;
        }

        let applied = match self.config.mode {
            JudgeMode::Auto => {
                let mut updated = record.clone();
                strategy.apply_decision(&mut updated, &judgment.decision);
                strategy.persist(conn, &updated)
            }
            JudgeMode::Review => PendingJudgmentStore::stage(
                conn,
                record,
                &judgment,
                &task.scope.module_scope,
                self.config.judgment_expiry_days,
            )
            .map(|_| ()),
        };

        match applied {
            Ok(()) => {
                if judgment.decision.is_related {
                    task.related_count += 1;
                } else {
                    task.unrelated_count += 1;
                    for term in judgment.denylist_candidates {
                        candidates.insert(term);
                    }
                    task.distinct_keyword_count = candidates.len() as u32;
                }
            }
            Err(e) => {
                error!(kind = %record.kind, record_id = record.id, error = %e, "Failed to store decision");
                task.failed_count += 1;
            }
        }
    }

    /// Re-read persisted status; external cancellation is observed at the
    /// next item boundary. Counters are flushed before reporting it.
    fn is_cancelled(&self, conn: &Connection, task: &Task) -> Result<bool, JudgeError> {
        if SqliteTaskStore::status(conn, &task.id)? == TaskStatus::Cancelled {
            SqliteTaskStore::update_counters(conn, task)?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_database, open_memory_database};
    use crate::judge::oracle::{MockOracleClient, OracleError};
    use crate::judge::types::{
        ClassificationInput, Decision, DecisionSource, JudgmentStatus, TaskScope,
        DEVICE_DATA_MODULE,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config(mode: JudgeMode) -> JudgeConfig {
        JudgeConfig {
            mode,
            pacing_delay_ms: 0,
            persist_interval: 10,
            ..Default::default()
        }
    }

    fn seed_registrations(conn: &Connection, count: usize) {
        for i in 0..count {
            conn.execute(
                "INSERT INTO device_registrations (device_name, manufacturer_name, device_description)
                 VALUES (?1, 'Acme Imaging Inc.', 'desc')",
                [format!("Device {i}")],
            )
            .unwrap();
        }
    }

    fn scope_registrations_only() -> TaskScope {
        TaskScope {
            record_kinds: Some(vec![RecordKind::Registration]),
            ..Default::default()
        }
    }

    #[test]
    fn auto_mode_applies_unrelated_decisions() {
        let conn = open_memory_database().unwrap();
        seed_registrations(&conn, 5);
        let task = SqliteTaskStore::create(&conn, &scope_registrations_only()).unwrap();

        let runner = TaskRunner::new(
            Arc::new(MockOracleClient::unrelated(0.9)),
            fast_config(JudgeMode::Auto),
        );
        let finished = runner.run(&conn, &task.id).unwrap();

        assert_eq!(finished.status, TaskStatus::Completed);
        assert_eq!(finished.total_count, 5);
        assert_eq!(finished.processed_count, 5);
        assert_eq!(finished.unrelated_count, 5);
        assert_eq!(finished.related_count, 0);
        assert_eq!(finished.failed_count, 0);

        let low: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM device_registrations WHERE risk_level = 'LOW'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(low, 5);
    }

    #[test]
    fn auto_mode_keeps_related_records_high() {
        let conn = open_memory_database().unwrap();
        seed_registrations(&conn, 3);
        let task = SqliteTaskStore::create(&conn, &scope_registrations_only()).unwrap();

        let runner = TaskRunner::new(
            Arc::new(MockOracleClient::related(0.95)),
            fast_config(JudgeMode::Auto),
        );
        let finished = runner.run(&conn, &task.id).unwrap();

        assert_eq!(finished.related_count, 3);
        let high: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM device_registrations WHERE risk_level = 'HIGH'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(high, 3);
        // Remark lands even when the risk level stays.
        let with_remark: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM device_registrations WHERE remark IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(with_remark, 3);
    }

    #[test]
    fn review_mode_stages_instead_of_mutating() {
        let conn = open_memory_database().unwrap();
        seed_registrations(&conn, 4);
        let task = SqliteTaskStore::create(&conn, &scope_registrations_only()).unwrap();

        let runner = TaskRunner::new(
            Arc::new(MockOracleClient::unrelated(0.9)),
            fast_config(JudgeMode::Review),
        );
        let finished = runner.run(&conn, &task.id).unwrap();

        assert_eq!(finished.status, TaskStatus::Completed);
        assert_eq!(finished.unrelated_count, 4);

        let high: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM device_registrations WHERE risk_level = 'HIGH'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(high, 4, "review mode must not mutate records");

        let staged = PendingJudgmentStore::list(&conn, DEVICE_DATA_MODULE, None, 50).unwrap();
        assert_eq!(staged.len(), 4);
        assert!(staged.iter().all(|j| j.status == JudgmentStatus::Pending));
    }

    #[test]
    fn denylist_hits_skip_oracle_entirely() {
        let conn = open_memory_database().unwrap();
        DenyListStore::add_term(&conn, "acme imaging").unwrap();
        seed_registrations(&conn, 3);
        let task = SqliteTaskStore::create(&conn, &scope_registrations_only()).unwrap();

        let mock = Arc::new(MockOracleClient::related(0.9));
        let runner = TaskRunner::new(mock.clone(), fast_config(JudgeMode::Auto));
        let finished = runner.run(&conn, &task.id).unwrap();

        // Manufacturer matches the deny term for every record.
        assert_eq!(finished.unrelated_count, 3);
        assert_eq!(mock.call_count(), 0);

        let low: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM device_registrations WHERE risk_level = 'LOW'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(low, 3);
    }

    #[test]
    fn oracle_failures_are_isolated_per_item() {
        let conn = open_memory_database().unwrap();
        seed_registrations(&conn, 4);
        let task = SqliteTaskStore::create(&conn, &scope_registrations_only()).unwrap();

        let runner = TaskRunner::new(
            Arc::new(MockOracleClient::failing()),
            fast_config(JudgeMode::Auto),
        );
        let finished = runner.run(&conn, &task.id).unwrap();

        // Every call failed, but the task itself completed.
        assert_eq!(finished.status, TaskStatus::Completed);
        assert_eq!(finished.processed_count, 4);
        assert_eq!(finished.failed_count, 4);
        assert_eq!(finished.related_count + finished.unrelated_count, 0);
    }

    #[test]
    fn fail_closed_verdicts_count_as_failed_and_touch_nothing() {
        let conn = open_memory_database().unwrap();
        seed_registrations(&conn, 3);
        let task = SqliteTaskStore::create(&conn, &scope_registrations_only()).unwrap();

        let runner = TaskRunner::new(
            Arc::new(MockOracleClient::malformed()),
            fast_config(JudgeMode::Auto),
        );
        let finished = runner.run(&conn, &task.id).unwrap();

        assert_eq!(finished.failed_count, 3);
        assert_eq!(finished.unrelated_count, 0);
        let low: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM device_registrations WHERE risk_level = 'LOW'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(low, 0, "fail-closed verdicts must never downgrade records");
        // No deny-list growth either.
        assert!(DenyListStore::load_enabled(&conn).unwrap().is_empty());
    }

    #[test]
    fn completed_task_grows_deny_list_with_distinct_candidates() {
        let conn = open_memory_database().unwrap();
        // Two distinct manufacturers across four records.
        for (i, maker) in ["Acme Imaging Inc.", "Acme Imaging Inc.", "Borex Dental Ltd", "Borex Dental Ltd"]
            .iter()
            .enumerate()
        {
            conn.execute(
                "INSERT INTO device_registrations (device_name, manufacturer_name) VALUES (?1, ?2)",
                rusqlite::params![format!("d{i}"), maker],
            )
            .unwrap();
        }
        let task = SqliteTaskStore::create(&conn, &scope_registrations_only()).unwrap();

        let runner = TaskRunner::new(
            Arc::new(MockOracleClient::unrelated(0.9)),
            fast_config(JudgeMode::Auto),
        );
        let finished = runner.run(&conn, &task.id).unwrap();

        assert_eq!(finished.distinct_keyword_count, 2);
        let deny = DenyListStore::load_enabled(&conn).unwrap();
        let mut terms = deny.terms().to_vec();
        terms.sort();
        assert_eq!(terms, vec!["Acme Imaging".to_string(), "Borex Dental".to_string()]);
    }

    #[test]
    fn non_pending_task_is_refused() {
        let conn = open_memory_database().unwrap();
        let task = SqliteTaskStore::create(&conn, &scope_registrations_only()).unwrap();
        SqliteTaskStore::mark_completed(&conn, &task.id).unwrap();

        let runner = TaskRunner::new(
            Arc::new(MockOracleClient::related(0.9)),
            fast_config(JudgeMode::Auto),
        );
        let result = runner.run(&conn, &task.id).unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.processed_count, 0);
    }

    #[test]
    fn empty_scope_completes_with_zero_counts() {
        let conn = open_memory_database().unwrap();
        let task = SqliteTaskStore::create(&conn, &TaskScope::default()).unwrap();

        let mock = Arc::new(MockOracleClient::related(0.9));
        let runner = TaskRunner::new(mock.clone(), fast_config(JudgeMode::Auto));
        let finished = runner.run(&conn, &task.id).unwrap();

        assert_eq!(finished.status, TaskStatus::Completed);
        assert_eq!(finished.total_count, 0);
        assert_eq!(mock.call_count(), 0);
    }

    /// Oracle that cancels the task through its own connection after a set
    /// number of calls, mid-run.
    struct CancellingOracle {
        db_path: std::path::PathBuf,
        task_id: String,
        cancel_after: usize,
        calls: AtomicUsize,
    }

    impl crate::judge::oracle::OracleClient for CancellingOracle {
        fn classify(&self, _input: &ClassificationInput) -> Result<Decision, OracleError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.cancel_after {
                let conn = open_database(&self.db_path).unwrap();
                SqliteTaskStore::cancel(&conn, &self.task_id).unwrap();
            }
            Ok(Decision {
                is_related: false,
                confidence: 0.9,
                reason: "unrelated".to_string(),
                category: String::new(),
                extracted_keywords: Vec::new(),
                source: DecisionSource::Oracle,
                fail_closed: false,
            })
        }
    }

    #[test]
    fn cancellation_lands_at_next_item_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("judge.db");
        let conn = open_database(&db_path).unwrap();
        seed_registrations(&conn, 100);
        let task = SqliteTaskStore::create(&conn, &scope_registrations_only()).unwrap();

        let oracle = Arc::new(CancellingOracle {
            db_path: db_path.clone(),
            task_id: task.id.clone(),
            cancel_after: 40,
            calls: AtomicUsize::new(0),
        });
        let runner = TaskRunner::new(oracle, fast_config(JudgeMode::Auto));
        let finished = runner.run(&conn, &task.id).unwrap();

        // Item 40 completes, the cancel is observed before item 41 starts.
        assert_eq!(finished.status, TaskStatus::Cancelled);
        assert_eq!(finished.processed_count, 40);
        assert_eq!(finished.unrelated_count, 40);
        assert!(finished.end_time.is_some());

        // The remaining 60 records are untouched.
        let high: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM device_registrations WHERE risk_level = 'HIGH'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(high, 60);
    }

    #[test]
    fn cancelled_before_start_processes_nothing() {
        let conn = open_memory_database().unwrap();
        seed_registrations(&conn, 5);
        let task = SqliteTaskStore::create(&conn, &scope_registrations_only()).unwrap();
        SqliteTaskStore::cancel(&conn, &task.id).unwrap();

        let mock = Arc::new(MockOracleClient::unrelated(0.9));
        let runner = TaskRunner::new(mock.clone(), fast_config(JudgeMode::Auto));
        let finished = runner.run(&conn, &task.id).unwrap();

        // Cancelled is terminal; the runner refuses it outright.
        assert_eq!(finished.status, TaskStatus::Cancelled);
        assert_eq!(finished.processed_count, 0);
        assert_eq!(mock.call_count(), 0);
    }
}
