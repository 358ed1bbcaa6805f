//! Relevance judging pipeline for regulatory device records.
//!
//! The pipeline runs per record:
//! Deny-list fast path → Classification oracle → Decision →
//! apply (auto mode) or stage for human review (review mode).
//!
//! Module map:
//! - `types` — shared domain types and configuration
//! - `denylist` — case-insensitive substring matcher + SQLite store
//! - `oracle` — HTTP classification client behind the `OracleClient` trait
//! - `candidates` — manufacturer → deny-list candidate derivation
//! - `strategy` — per-kind record access behind the `RecordStrategy` trait
//! - `engine` — combines deny list and oracle into one `Judgment`
//! - `task_store` — task rows, counters, cancellation flag
//! - `runner` — the sequential batch loop
//! - `review` — pending judgment queue with confirm/reject/expire
//! - `executor` — background worker pool

pub mod candidates;
pub mod denylist;
pub mod engine;
pub mod executor;
pub mod oracle;
pub mod review;
pub mod runner;
pub mod strategy;
pub mod task_store;
pub mod types;

pub use denylist::{DenyList, DenyListStore};
pub use engine::{DecisionEngine, Judgment};
pub use executor::JudgeExecutor;
pub use oracle::{HttpOracleClient, MockOracleClient, OracleClient, OracleError};
pub use review::{PendingJudgmentStore, ReviewController};
pub use runner::TaskRunner;
pub use strategy::{RecordStrategy, StrategyRegistry};
pub use task_store::SqliteTaskStore;
pub use types::*;

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("JSON serialization error: {0}")]
    Json(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Record not found: {kind} #{id}")]
    RecordNotFound { kind: types::RecordKind, id: i64 },

    #[error("Pending judgment not found: {0}")]
    JudgmentNotFound(String),

    #[error("Judgment {id} already processed (status: {status})")]
    StateConflict { id: String, status: String },

    #[error("No strategy registered for record kind: {0}")]
    UnknownRecordKind(String),

    #[error("Executor is shut down")]
    ExecutorUnavailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for JudgeError {
    fn from(e: rusqlite::Error) -> Self {
        JudgeError::Database(DatabaseError::Sqlite(e))
    }
}

impl From<serde_json::Error> for JudgeError {
    fn from(e: serde_json::Error) -> Self {
        JudgeError::Json(e.to_string())
    }
}
