//! Dermascreen — relevance screening for regulatory skin-device records.
//!
//! Regulatory feeds (registrations, applications, recalls, adverse events,
//! guidance documents, customs rulings) arrive marked HIGH risk. The judge
//! pipeline rules out unrelated records via a deny-list fast path and an AI
//! classification oracle; in review mode every verdict is staged for human
//! confirmation before a record changes.

pub mod config;
pub mod db;
pub mod judge;

use tracing_subscriber::EnvFilter;

/// Initialize tracing with RUST_LOG support. Call once at startup.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Open the application database and run startup recovery: tasks whose
/// runner was lost to a restart are failed, overdue pending judgments are
/// expired.
pub fn open_and_recover() -> Result<rusqlite::Connection, judge::JudgeError> {
    let data_dir = config::app_data_dir();
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
    }
    let conn = db::open_database(&config::database_path()).map_err(judge::JudgeError::Database)?;
    judge::SqliteTaskStore::recover_interrupted(&conn)?;
    judge::PendingJudgmentStore::sweep_expired(&conn, chrono::Utc::now())?;
    Ok(conn)
}
