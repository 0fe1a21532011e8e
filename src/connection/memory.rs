use super::Database;
use crate::core::{Result, StatementFailure};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MemorySession {
    committed: Vec<String>,
    pending: Vec<String>,
    attempts: Vec<String>,
    failures: HashMap<String, StatementFailure>,
}

/// Database double that records statements instead of running them.
///
/// Statements registered with [`MemoryDatabaseHandle::fail_on`] fail with the
/// given code until the failure is cleared.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    session: Arc<Mutex<MemorySession>>,
}

/// Shared view of a [`MemoryDatabase`], kept by tests after the database is
/// handed to the upgrader.
#[derive(Debug, Clone)]
pub struct MemoryDatabaseHandle {
    session: Arc<Mutex<MemorySession>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> MemoryDatabaseHandle {
        MemoryDatabaseHandle {
            session: self.session.clone(),
        }
    }
}

impl MemoryDatabaseHandle {
    /// A new database over the same session, as after a process restart.
    pub fn reopen(&self) -> MemoryDatabase {
        MemoryDatabase {
            session: self.session.clone(),
        }
    }

    pub fn fail_on(&self, sql: &str, code: &str, message: &str) {
        if let Ok(mut session) = self.session.lock() {
            session
                .failures
                .insert(sql.to_string(), StatementFailure::new(code, message));
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut session) = self.session.lock() {
            session.failures.clear();
        }
    }

    /// Statements that made it through a commit, in order.
    pub fn committed(&self) -> Vec<String> {
        self.session
            .lock()
            .map(|s| s.committed.clone())
            .unwrap_or_default()
    }

    /// Every statement the engine tried, including failed ones.
    pub fn attempts(&self) -> Vec<String> {
        self.session
            .lock()
            .map(|s| s.attempts.clone())
            .unwrap_or_default()
    }

    pub fn pending(&self) -> Vec<String> {
        self.session
            .lock()
            .map(|s| s.pending.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn execute(&mut self, sql: &str) -> std::result::Result<(), StatementFailure> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| StatementFailure::new("lock", e.to_string()))?;
        session.attempts.push(sql.to_string());
        if let Some(failure) = session.failures.get(sql) {
            return Err(failure.clone());
        }
        session.pending.push(sql.to_string());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut session = self.session.lock()?;
        let pending = std::mem::take(&mut session.pending);
        session.committed.extend(pending);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.session.lock()?.pending.clear();
        Ok(())
    }
}
