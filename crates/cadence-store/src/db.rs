//! Shared database handle.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::TransactionBehavior;
use tokio_rusqlite::Connection;
use tracing::debug;

use cadence_core::{Clock, SchedulerError, SystemClock};

use crate::schema::init_schema;

/// Handle to the SQLite database shared by every store.
///
/// Cloning is cheap; clones share one connection thread. Separate processes
/// open their own handle on the same file and coordinate through SQLite's
/// write lock.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
    clock: Arc<dyn Clock>,
    lease: Option<chrono::Duration>,
}

impl Database {
    /// Open (or create) a file-backed database in WAL mode.
    pub async fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, SchedulerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SchedulerError::Database(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(&path).await.map_err(db_error)?;
        conn.call(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            Ok(init_schema(conn)?)
        })
        .await
        .map_err(db_error)?;

        debug!("Database opened at {:?}", path);
        Ok(Self::from_connection(conn))
    }

    /// Create a private in-memory database.
    pub async fn in_memory() -> Result<Self, SchedulerError> {
        let conn = Connection::open_in_memory().await.map_err(db_error)?;
        conn.call(|conn| Ok(init_schema(conn)?))
            .await
            .map_err(db_error)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            clock: Arc::new(SystemClock),
            lease: None,
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the lock lease. `None` disables expiry.
    pub fn with_lease(mut self, lease: Option<Duration>) -> Self {
        self.lease = lease.and_then(|d| chrono::Duration::from_std(d).ok());
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn lease(&self) -> Option<chrono::Duration> {
        self.lease
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// When a lock taken at `now` expires.
    pub(crate) fn lease_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.lease.map(|lease| now + lease)
    }

    /// Run a read-only closure on the connection thread.
    pub(crate) async fn read<F, R>(&self, f: F) -> Result<R, SchedulerError>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(db_error)
    }

    /// Run a closure inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken before the first read, so the closure's reads
    /// and writes are atomic with respect to every other connection.
    pub(crate) async fn write<F, R>(&self, f: F) -> Result<R, SchedulerError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let result = f(&tx)?;
                tx.commit()?;
                Ok(result)
            })
            .await
            .map_err(db_error)
    }
}

fn db_error(e: tokio_rusqlite::Error) -> SchedulerError {
    SchedulerError::Database(e.to_string())
}
