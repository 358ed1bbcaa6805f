//! Background worker pool for judge tasks.
//!
//! Submission persists a PENDING task row and queues its id; a bounded set
//! of worker threads pull ids off a shared channel, each opening its own
//! connection per task. Shutdown is a flag plus join-on-drop; a task in
//! flight finishes (or is cancelled through the persisted flag) before the
//! worker exits.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{error, info};

use super::oracle::OracleClient;
use super::runner::TaskRunner;
use super::task_store::SqliteTaskStore;
use super::types::{JudgeConfig, TaskScope};
use super::JudgeError;

/// Poll granularity for shutdown responsiveness.
const RECV_TIMEOUT_MS: u64 = 500;

pub struct JudgeExecutor {
    sender: Sender<String>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl JudgeExecutor {
    /// Start the worker pool. Workers share one oracle client and open
    /// their own database connections.
    pub fn start(db_path: PathBuf, oracle: Arc<dyn OracleClient>, config: JudgeConfig) -> Self {
        let (sender, receiver) = mpsc::channel::<String>();
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown = Arc::new(AtomicBool::new(false));

        let workers = (0..config.worker_threads.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let shutdown = shutdown.clone();
                let db_path = db_path.clone();
                let runner = TaskRunner::new(oracle.clone(), config.clone());
                std::thread::spawn(move || {
                    worker_loop(worker_id, &db_path, &runner, &receiver, &shutdown);
                })
            })
            .collect();

        info!(workers = config.worker_threads.max(1), "Judge executor started");
        Self {
            sender,
            shutdown,
            workers,
        }
    }

    /// Persist a PENDING task for the scope and queue it for a worker.
    /// Returns the task id immediately.
    pub fn submit(&self, conn: &Connection, scope: TaskScope) -> Result<String, JudgeError> {
        let task = SqliteTaskStore::create(conn, &scope)?;
        self.sender
            .send(task.id.clone())
            .map_err(|_| JudgeError::ExecutorUnavailable)?;
        info!(task_id = %task.id, "Task queued");
        Ok(task.id)
    }

    /// Request graceful shutdown. Queued but unstarted tasks stay PENDING.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for JudgeExecutor {
    fn drop(&mut self) {
        self.shutdown();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    worker_id: usize,
    db_path: &std::path::Path,
    runner: &TaskRunner,
    receiver: &Mutex<Receiver<String>>,
    shutdown: &AtomicBool,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!(worker_id, "Judge worker shutting down");
            return;
        }

        let next = {
            let Ok(guard) = receiver.lock() else {
                return;
            };
            guard.recv_timeout(Duration::from_millis(RECV_TIMEOUT_MS))
        };

        match next {
            Ok(task_id) => {
                let conn = match crate::db::open_database(db_path) {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(worker_id, task_id = %task_id, error = %e, "Cannot open database");
                        continue;
                    }
                };
                if let Err(e) = runner.run(&conn, &task_id) {
                    error!(worker_id, task_id = %task_id, error = %e, "Task run errored");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                info!(worker_id, "Judge queue closed, worker exiting");
                return;
            }
        }
    }
}
