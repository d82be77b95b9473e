//! SQLite persistence on a dedicated worker thread.
//!
//! Callers hand closures to the worker over an mpsc channel and await the
//! result on a oneshot, so no async task ever blocks on disk I/O and the
//! connection stays single-threaded.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::{error, info};
use rusqlite::{params, Connection};
use tokio::sync::oneshot;

mod migrations;

use migrations::run_migrations;

use crate::usage::DirtyUsage;

/// Meta key holding the day the limits were last restored.
pub const META_LAST_RESET_DAY: &str = "last_reset_day";

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

/// A persisted per-app limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLimit {
    pub package: String,
    pub limit_minutes: u32,
    pub original_minutes: u32,
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("screenward-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Database initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    pub async fn upsert_limit(
        &self,
        package: &str,
        limit_minutes: u32,
        original_minutes: u32,
    ) -> Result<()> {
        let package = package.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO limits (package, limit_minutes, original_minutes)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(package) DO UPDATE SET
                     limit_minutes = excluded.limit_minutes,
                     original_minutes = excluded.original_minutes",
                params![package, limit_minutes, original_minutes],
            )
            .with_context(|| "failed to upsert limit")?;
            Ok(())
        })
        .await
    }

    pub async fn delete_limit(&self, package: &str) -> Result<()> {
        let package = package.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM limits WHERE package = ?1", params![package])
                .with_context(|| "failed to delete limit")?;
            Ok(())
        })
        .await
    }

    pub async fn load_limits(&self) -> Result<Vec<StoredLimit>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT package, limit_minutes, original_minutes FROM limits ORDER BY package",
            )?;
            let mut rows = stmt.query([])?;
            let mut limits = Vec::new();
            while let Some(row) = rows.next()? {
                limits.push(StoredLimit {
                    package: row.get(0)?,
                    limit_minutes: row.get(1)?,
                    original_minutes: row.get(2)?,
                });
            }
            Ok(limits)
        })
        .await
    }

    /// Restore every current limit to its original value. Part of the
    /// daily reset.
    pub async fn restore_all_limits(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute("UPDATE limits SET limit_minutes = original_minutes", [])
                .with_context(|| "failed to restore limits")?;
            Ok(())
        })
        .await
    }

    /// Write a batch of reconciled usage bases for one day in a single
    /// transaction.
    pub async fn upsert_usage(&self, day: NaiveDate, dirty: Vec<DirtyUsage>) -> Result<()> {
        if dirty.is_empty() {
            return Ok(());
        }
        let day = day.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO daily_usage (package, day, base_ms)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(package, day) DO UPDATE SET
                         base_ms = MAX(base_ms, excluded.base_ms)",
                )?;
                for record in &dirty {
                    stmt.execute(params![record.package, day, record.base_ms])
                        .with_context(|| "failed to upsert daily usage")?;
                }
            }
            tx.commit().context("failed to commit usage batch")?;
            Ok(())
        })
        .await
    }

    pub async fn load_usage(&self, day: NaiveDate) -> Result<Vec<DirtyUsage>> {
        let day = day.to_string();
        self.execute(move |conn| {
            let mut stmt =
                conn.prepare("SELECT package, base_ms FROM daily_usage WHERE day = ?1")?;
            let mut rows = stmt.query(params![day])?;
            let mut usage = Vec::new();
            while let Some(row) = rows.next()? {
                usage.push(DirtyUsage {
                    package: row.get(0)?,
                    base_ms: row.get(1)?,
                });
            }
            Ok(usage)
        })
        .await
    }

    /// Prune usage rows from days before `keep_from`.
    pub async fn prune_usage_before(&self, keep_from: NaiveDate) -> Result<usize> {
        let keep_from = keep_from.to_string();
        self.execute(move |conn| {
            let removed = conn
                .execute("DELETE FROM daily_usage WHERE day < ?1", params![keep_from])
                .with_context(|| "failed to prune usage")?;
            Ok(removed)
        })
        .await
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare("SELECT value FROM meta WHERE key = ?1")?;
            let mut rows = stmt.query(params![key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .with_context(|| "failed to set meta value")?;
            Ok(())
        })
        .await
    }
}
