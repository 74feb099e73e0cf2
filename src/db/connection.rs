use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use rusqlite::{Connection, Transaction};
use tokio::sync::oneshot;

use super::migrations::run_migrations;
use crate::{
    error::{StoreError, StoreResult},
    log_error, log_info,
};

const ENABLE_LOGS: bool = true;

const WORKER_NAME: &str = "agp-db";

/// Imports can hold the write lock for a while; readers wait instead of
/// failing with SQLITE_BUSY.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

/// Sender side of the worker plus the join handle, taken once on shutdown.
struct Worker {
    sender: mpsc::Sender<DbCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn stop(&self) {
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        if let Err(err) = self.sender.send(DbCommand::Shutdown) {
            log_error!("Failed to send shutdown to DB worker: {err}");
        }
        if let Err(err) = handle.join() {
            log_error!("Failed to join DB worker: {err:?}");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle to the SQLite store. All statements run on one dedicated worker
/// thread; `execute_tx` wraps a closure in a single transaction.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
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
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let path = db_path.clone();

        let handle = thread::Builder::new()
            .name(WORKER_NAME.into())
            .spawn(move || {
                let mut conn = match open_connection(&path) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                serve(&mut conn, &command_rx);
            })
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        log_info!("Database ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                sender: command_tx,
                handle: Mutex::new(Some(handle)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Stop the worker after it drains queued tasks. The join runs on the
    /// blocking pool. Later calls to `execute` fail instead of hanging.
    pub async fn close(&self) {
        let worker = Arc::clone(&self.worker);
        if let Err(err) = tokio::task::spawn_blocking(move || worker.stop()).await {
            log_error!("DB shutdown task failed: {err}");
        }
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            // A dropped receiver means the caller gave up; the result is moot.
            let _ = reply_tx.send(task(conn));
        }));

        self.worker
            .sender
            .send(command)
            .map_err(|_| anyhow!("database worker is closed"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database worker terminated unexpectedly"))?
    }

    /// Run `task` inside one transaction. It commits when the closure returns
    /// `Ok`; any error rolls everything back and surfaces as a storage error.
    pub async fn execute_tx<F, T>(&self, task: F) -> StoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to open transaction")?;
            let value = task(&tx)?;
            tx.commit().context("failed to commit transaction")?;
            Ok(value)
        })
        .await
        .map_err(StoreError::StorageWrite)
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL mode")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn serve(conn: &mut Connection, commands: &mpsc::Receiver<DbCommand>) {
    let mut served: u64 = 0;
    while let Ok(command) = commands.recv() {
        match command {
            DbCommand::Execute(task) => {
                task(conn);
                served += 1;
            }
            DbCommand::Shutdown => break,
        }
    }
    log_info!("DB worker stopping after {served} tasks");
}
