use super::Database;
use crate::core::{Result, StatementFailure, UpgradeError};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Connection shared between a [`SqliteDatabase`] and the version store that
/// lives on the same file.
pub type SqliteHandle = Arc<Mutex<Connection>>;

/// SQLite backed [`Database`].
///
/// Error codes are SQLite extended result codes rendered as decimal strings
/// (`"1"` for a generic error, `"2067"` for a unique constraint, ...).
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    conn: SqliteHandle,
}

impl SqliteDatabase {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Option<Duration>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        if let Some(timeout) = busy_timeout {
            conn.busy_timeout(timeout)?;
        }
        debug!(path = %path.display(), "opened sqlite database");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn handle(&self) -> SqliteHandle {
        self.conn.clone()
    }
}

/// Starts a transaction unless one is already open.
pub(crate) fn begin_if_needed(conn: &Connection) -> rusqlite::Result<()> {
    if conn.is_autocommit() {
        conn.execute_batch("BEGIN")?;
    }
    Ok(())
}

pub(crate) fn commit_if_open(conn: &Connection) -> rusqlite::Result<()> {
    if !conn.is_autocommit() {
        conn.execute_batch("COMMIT")?;
    }
    Ok(())
}

pub(crate) fn rollback_if_open(conn: &Connection) -> rusqlite::Result<()> {
    if !conn.is_autocommit() {
        conn.execute_batch("ROLLBACK")?;
    }
    Ok(())
}

fn statement_failure(err: rusqlite::Error) -> StatementFailure {
    match &err {
        rusqlite::Error::SqliteFailure(inner, message) => StatementFailure::new(
            inner.extended_code.to_string(),
            message.clone().unwrap_or_else(|| inner.to_string()),
        ),
        _ => StatementFailure::new("unknown", err.to_string()),
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn execute(&mut self, sql: &str) -> std::result::Result<(), StatementFailure> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StatementFailure::new("lock", e.to_string()))?;
        begin_if_needed(&conn).map_err(statement_failure)?;
        conn.execute_batch(sql).map_err(statement_failure)
    }

    async fn commit(&mut self) -> Result<()> {
        let conn = self.conn.lock()?;
        commit_if_open(&conn).map_err(|e| UpgradeError::Database(format!("Commit failed: {}", e)))
    }

    async fn rollback(&mut self) -> Result<()> {
        let conn = self.conn.lock()?;
        rollback_if_open(&conn)
            .map_err(|e| UpgradeError::Database(format!("Rollback failed: {}", e)))
    }
}
