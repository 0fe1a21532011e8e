use super::{
    CURRENT_CONTROL_SPEC, LogEntry, LogKind, LogOutcome, RESULT_COMPLETE, RESULT_DOWNGRADED,
    VersionState, VersionStore,
};
use crate::connection::DEFAULT_CONNECTION;
use crate::connection::sqlite::{SqliteHandle, begin_if_needed, commit_if_open, rollback_if_open};
use crate::core::{Result, UpgradeError, Version};
use crate::definition::ControlTables;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

/// Version store on the SQLite control tables.
///
/// The store writes through the same connection as the statements that run
/// on [`SqliteVersionStore::connection_name`], so a statement and its
/// checkpoint commit together.
pub struct SqliteVersionStore {
    conn: SqliteHandle,
    tables: ControlTables,
    connection_name: String,
}

impl SqliteVersionStore {
    pub fn new(conn: SqliteHandle, tables: ControlTables) -> Self {
        Self {
            conn,
            tables,
            connection_name: DEFAULT_CONNECTION.to_string(),
        }
    }

    pub fn on_connection(mut self, name: &str) -> Self {
        self.connection_name = name.to_lowercase();
        self
    }

    fn version_table(&self) -> &str {
        &self.tables.version_table
    }

    fn log_table(&self) -> &str {
        &self.tables.log_table
    }
}

/// Splits `schema.table` so the right `sqlite_master` gets queried.
fn table_exists(conn: &Connection, qualified: &str) -> rusqlite::Result<bool> {
    let (schema, table) = match qualified.split_once('.') {
        Some((schema, table)) => (schema, table),
        None => ("main", qualified),
    };
    let sql = format!(
        "SELECT 1 FROM {}.sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        schema
    );
    conn.query_row(&sql, params![table], |_| Ok(()))
        .optional()
        .map(|row| row.is_some())
}

fn database_error(context: &str, err: rusqlite::Error) -> UpgradeError {
    UpgradeError::Database(format!("{}: {}", context, err))
}

#[async_trait]
impl VersionStore for SqliteVersionStore {
    fn connection_name(&self) -> &str {
        &self.connection_name
    }

    async fn load(&mut self) -> Result<VersionState> {
        let conn = self.conn.lock()?;
        if !table_exists(&conn, self.version_table())? {
            return Ok(VersionState::default());
        }

        let sql = format!(
            "SELECT VERSION, TARGET, STATEMENTS, SPEC FROM {}",
            self.version_table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt
            .query_map([], |row| {
                Ok(VersionState {
                    version: row.get(0)?,
                    target: row.get(1)?,
                    statements: row.get::<_, Option<u32>>(2)?.unwrap_or(0),
                    control_spec: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        match rows.len() {
            0 => Ok(VersionState::default()),
            1 => Ok(rows.remove(0)),
            n => Err(UpgradeError::Consistency(format!(
                "Expected exactly one row in {}, found {}",
                self.version_table(),
                n
            ))),
        }
    }

    async fn checkpoint(&mut self, target: &str, statements: u32) -> Result<()> {
        if target.is_empty() || statements == 0 {
            return Err(UpgradeError::Consistency(format!(
                "Invalid checkpoint: target '{}', statements {}",
                target, statements
            )));
        }
        let conn = self.conn.lock()?;
        begin_if_needed(&conn)?;
        let updated = conn.execute(
            &format!("UPDATE {} SET TARGET = ?1, STATEMENTS = ?2", self.version_table()),
            params![target, statements],
        )?;
        if updated == 0 {
            conn.execute(
                &format!(
                    "INSERT INTO {} (TARGET, STATEMENTS) VALUES (?1, ?2)",
                    self.version_table()
                ),
                params![target, statements],
            )?;
        }
        Ok(())
    }

    async fn complete(&mut self, target: &str) -> Result<()> {
        let conn = self.conn.lock()?;
        begin_if_needed(&conn)?;
        let updated = conn.execute(
            &format!(
                "UPDATE {} SET VERSION = ?1, TARGET = NULL, STATEMENTS = 0",
                self.version_table()
            ),
            params![target],
        )?;
        if updated == 0 {
            conn.execute(
                &format!(
                    "INSERT INTO {} (VERSION, STATEMENTS) VALUES (?1, 0)",
                    self.version_table()
                ),
                params![target],
            )?;
        }
        Ok(())
    }

    async fn update_spec(&mut self, spec: &str) -> Result<()> {
        let conn = self.conn.lock()?;
        begin_if_needed(&conn)?;
        let updated = conn.execute(
            &format!("UPDATE {} SET SPEC = ?1", self.version_table()),
            params![spec],
        )?;
        if updated == 0 {
            conn.execute(
                &format!(
                    "INSERT INTO {} (STATEMENTS, SPEC) VALUES (0, ?1)",
                    self.version_table()
                ),
                params![spec],
            )?;
        }
        Ok(())
    }

    async fn record(&mut self, entry: LogEntry) -> Result<()> {
        let conn = self.conn.lock()?;
        if !table_exists(&conn, self.log_table())? {
            debug!(table = self.log_table(), "log table missing, entry not recorded");
            return Ok(());
        }
        begin_if_needed(&conn)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (TYPE, SOURCE, TARGET, STATEMENT, STAMP, COMMAND, RESULT) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                self.log_table()
            ),
            params![
                entry.kind.code(),
                entry.source,
                entry.target,
                entry.ordinal,
                entry.stamp.to_rfc3339(),
                entry.command,
                entry.outcome.to_column(),
            ],
        )
        .map_err(|e| database_error("Failed to write log entry", e))?;
        Ok(())
    }

    async fn revert_history(&mut self, versions: &[Version]) -> Result<()> {
        let conn = self.conn.lock()?;
        if !table_exists(&conn, self.log_table())? {
            return Ok(());
        }
        begin_if_needed(&conn)?;
        let sql = format!(
            "UPDATE {} SET RESULT = ?1 WHERE TYPE = ?2 AND TARGET = ?3 AND RESULT = ?4",
            self.log_table()
        );
        for version in versions {
            let reverted = conn.execute(
                &sql,
                params![
                    RESULT_DOWNGRADED,
                    LogKind::Segment.code(),
                    version,
                    RESULT_COMPLETE
                ],
            )?;
            debug!(version = %version, rows = reverted, "history reverted");
        }
        Ok(())
    }

    async fn history_contains(&mut self, version: &str) -> Result<bool> {
        let conn = self.conn.lock()?;
        if !table_exists(&conn, self.log_table())? {
            return Ok(false);
        }
        let sql = format!(
            "SELECT 1 FROM {} WHERE TYPE = ?1 AND TARGET = ?2 AND RESULT = ?3 LIMIT 1",
            self.log_table()
        );
        let found = conn
            .query_row(
                &sql,
                params![LogKind::Segment.code(), version, RESULT_COMPLETE],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn entries(&mut self) -> Result<Vec<LogEntry>> {
        let conn = self.conn.lock()?;
        if !table_exists(&conn, self.log_table())? {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT TYPE, SOURCE, TARGET, STATEMENT, STAMP, COMMAND, RESULT FROM {} ORDER BY rowid",
            self.log_table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<u32>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (kind, source, target, ordinal, stamp, command, result) in rows {
            let Some(kind) = LogKind::from_code(&kind) else {
                warn!(kind = %kind, "skipping log row with unknown type");
                continue;
            };
            let stamp = DateTime::parse_from_rfc3339(&stamp)
                .map(|s| s.with_timezone(&Utc))
                .map_err(|e| {
                    UpgradeError::Consistency(format!("Invalid log timestamp '{}': {}", stamp, e))
                })?;
            entries.push(LogEntry {
                kind,
                source,
                target,
                ordinal: ordinal.unwrap_or(0),
                stamp,
                command,
                outcome: LogOutcome::from_column(result),
            });
        }
        Ok(entries)
    }

    async fn ensure_control_tables(&mut self) -> Result<()> {
        let conn = self.conn.lock()?;
        let version_exists = table_exists(&conn, self.version_table())?;
        let log_exists = table_exists(&conn, self.log_table())?;
        if version_exists && log_exists {
            return Ok(());
        }

        begin_if_needed(&conn)?;
        if !version_exists {
            conn.execute_batch(&format!(
                "CREATE TABLE {} (\
                     VERSION TEXT, \
                     TARGET TEXT, \
                     STATEMENTS INTEGER NOT NULL DEFAULT 0, \
                     SPEC TEXT)",
                self.version_table()
            ))?;
            conn.execute(
                &format!(
                    "INSERT INTO {} (STATEMENTS, SPEC) VALUES (0, ?1)",
                    self.version_table()
                ),
                params![CURRENT_CONTROL_SPEC],
            )?;
        }
        if !log_exists {
            conn.execute_batch(&format!(
                "CREATE TABLE {} (\
                     TYPE TEXT NOT NULL, \
                     SOURCE TEXT, \
                     TARGET TEXT NOT NULL, \
                     STATEMENT INTEGER NOT NULL, \
                     STAMP TEXT NOT NULL, \
                     COMMAND TEXT, \
                     RESULT TEXT)",
                self.log_table()
            ))?;
        }
        commit_if_open(&conn)?;
        debug!(
            version_table = self.version_table(),
            log_table = self.log_table(),
            "control tables created"
        );
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let conn = self.conn.lock()?;
        commit_if_open(&conn).map_err(|e| database_error("Commit of version state failed", e))
    }

    async fn rollback(&mut self) -> Result<()> {
        let conn = self.conn.lock()?;
        rollback_if_open(&conn).map_err(|e| database_error("Rollback of version state failed", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SqliteDatabase;

    fn store() -> SqliteVersionStore {
        let db = SqliteDatabase::open_in_memory().unwrap();
        SqliteVersionStore::new(db.handle(), ControlTables::default())
    }

    #[tokio::test]
    async fn test_missing_tables_read_as_fresh_database() {
        let mut store = store();
        assert_eq!(store.load().await.unwrap(), VersionState::default());
        assert!(!store.history_contains("1.0").await.unwrap());
        assert!(store.entries().await.unwrap().is_empty());

        // logging without a log table is silently skipped
        store
            .record(LogEntry::completed(None, "1.0", 0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_checkpoint_and_complete() {
        let mut store = store();
        store.ensure_control_tables().await.unwrap();
        assert_eq!(
            store.load().await.unwrap().control_spec.as_deref(),
            Some(CURRENT_CONTROL_SPEC)
        );

        store.checkpoint("1.0.1", 2).await.unwrap();
        store.commit().await.unwrap();
        let state = store.load().await.unwrap();
        assert_eq!(state.target.as_deref(), Some("1.0.1"));
        assert_eq!(state.statements, 2);
        assert_eq!(state.version, None);

        store.complete("1.0.1").await.unwrap();
        store.commit().await.unwrap();
        let state = store.load().await.unwrap();
        assert_eq!(state.version.as_deref(), Some("1.0.1"));
        assert_eq!(state.target, None);
        assert_eq!(state.statements, 0);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_checkpoint() {
        let mut store = store();
        store.ensure_control_tables().await.unwrap();
        store.checkpoint("1.0.1", 1).await.unwrap();
        store.rollback().await.unwrap();
        assert_eq!(store.load().await.unwrap().target, None);
    }

    #[tokio::test]
    async fn test_history_and_revert() {
        let mut store = store();
        store.ensure_control_tables().await.unwrap();
        store
            .record(LogEntry::statement(None, "1.0", 1, "CREATE TABLE a", LogOutcome::Success))
            .await
            .unwrap();
        store.record(LogEntry::completed(None, "1.0", 1)).await.unwrap();
        store
            .record(LogEntry::completed(Some("1.0"), "1.1", 0))
            .await
            .unwrap();
        store.commit().await.unwrap();

        assert!(store.history_contains("1.1").await.unwrap());
        store.revert_history(&["1.1".to_string()]).await.unwrap();
        store.commit().await.unwrap();
        assert!(!store.history_contains("1.1").await.unwrap());
        assert!(store.history_contains("1.0").await.unwrap());

        let entries = store.entries().await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind, LogKind::Statement);
        assert_eq!(entries[0].command.as_deref(), Some("CREATE TABLE a"));
        assert_eq!(entries[2].outcome, LogOutcome::Reverted);
    }

    #[tokio::test]
    async fn test_more_than_one_version_row_is_inconsistent() {
        let mut store = store();
        store.ensure_control_tables().await.unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute_batch("INSERT INTO DBVERSION (VERSION, STATEMENTS) VALUES ('x', 0)")
                .unwrap();
        }
        assert!(matches!(store.load().await, Err(UpgradeError::Consistency(_))));
    }
}
