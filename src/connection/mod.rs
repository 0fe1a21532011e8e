pub mod config;
pub mod memory;
pub mod sqlite;

pub use config::{SqliteConnectionConfig, UpgradeConfig};
pub use memory::{MemoryDatabase, MemoryDatabaseHandle};
pub use sqlite::SqliteDatabase;

use crate::core::{Result, StatementFailure, UpgradeError};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Name of the connection every definition starts on.
pub const DEFAULT_CONNECTION: &str = "default";

/// A database session that upgrade statements are sent to.
///
/// Implementations open a transaction lazily on the first statement and keep
/// it open until [`Database::commit`] or [`Database::rollback`].
#[async_trait]
pub trait Database: Send {
    /// Executes one statement. Driver errors come back with their code so the
    /// engine can match them against the active ignore set.
    async fn execute(&mut self, sql: &str) -> std::result::Result<(), StatementFailure>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Named connections an upgrade can switch between.
///
/// Names are case-insensitive.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<String, Box<dyn Database>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, database: Box<dyn Database>) {
        self.connections.insert(name.to_lowercase(), database);
    }

    pub fn with(mut self, name: &str, database: Box<dyn Database>) -> Self {
        self.register(name, database);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut (dyn Database + 'static)> {
        self.connections
            .get_mut(&name.to_lowercase())
            .map(|db| db.as_mut())
            .ok_or_else(|| UpgradeError::Config(format!("Connection '{}' is not configured", name)))
    }

    /// Rolls back whatever is pending on every connection.
    pub async fn rollback_all(&mut self) -> Result<()> {
        for database in self.connections.values_mut() {
            database.rollback().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.names())
            .finish()
    }
}
