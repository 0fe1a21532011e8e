use super::{CURRENT_CONTROL_SPEC, LogEntry, LogOutcome, VersionState, VersionStore};
use crate::connection::DEFAULT_CONNECTION;
use crate::core::{Result, UpgradeError, Version};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
struct ControlSnapshot {
    state: VersionState,
    log: Vec<LogEntry>,
    tables_exist: bool,
}

/// In-process version store. Writes are staged on a private copy and
/// published on commit.
#[derive(Debug)]
pub struct MemoryVersionStore {
    committed: Arc<Mutex<ControlSnapshot>>,
    staged: Option<ControlSnapshot>,
    connection_name: String,
}

/// Read access to the committed state of a [`MemoryVersionStore`].
#[derive(Debug, Clone)]
pub struct MemoryControlHandle {
    committed: Arc<Mutex<ControlSnapshot>>,
}

impl Default for MemoryVersionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryVersionStore {
    /// A store whose control tables already exist.
    pub fn new() -> Self {
        Self::with_state(VersionState {
            control_spec: Some(CURRENT_CONTROL_SPEC.to_string()),
            ..Default::default()
        })
    }

    /// A store without control tables, as on a brand new database.
    pub fn without_tables() -> Self {
        Self::from_snapshot(ControlSnapshot::default())
    }

    pub fn with_state(state: VersionState) -> Self {
        Self::from_snapshot(ControlSnapshot {
            state,
            log: Vec::new(),
            tables_exist: true,
        })
    }

    fn from_snapshot(snapshot: ControlSnapshot) -> Self {
        Self {
            committed: Arc::new(Mutex::new(snapshot)),
            staged: None,
            connection_name: DEFAULT_CONNECTION.to_string(),
        }
    }

    pub fn on_connection(mut self, name: &str) -> Self {
        self.connection_name = name.to_lowercase();
        self
    }

    pub fn handle(&self) -> MemoryControlHandle {
        MemoryControlHandle {
            committed: self.committed.clone(),
        }
    }

    fn read(&self) -> Result<ControlSnapshot> {
        match &self.staged {
            Some(staged) => Ok(staged.clone()),
            None => Ok(self.committed.lock()?.clone()),
        }
    }

    fn stage(&mut self) -> Result<&mut ControlSnapshot> {
        if self.staged.is_none() {
            let current = self.committed.lock()?.clone();
            self.staged = Some(current);
        }
        self.staged
            .as_mut()
            .ok_or_else(|| UpgradeError::LockError("staging area unavailable".into()))
    }
}

impl MemoryControlHandle {
    /// A new store over the committed state; anything staged is lost.
    pub fn reopen(&self) -> MemoryVersionStore {
        MemoryVersionStore {
            committed: self.committed.clone(),
            staged: None,
            connection_name: DEFAULT_CONNECTION.to_string(),
        }
    }

    pub fn state(&self) -> VersionState {
        self.committed
            .lock()
            .map(|s| s.state.clone())
            .unwrap_or_default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.committed
            .lock()
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    pub fn tables_exist(&self) -> bool {
        self.committed.lock().map(|s| s.tables_exist).unwrap_or(false)
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    fn connection_name(&self) -> &str {
        &self.connection_name
    }

    async fn load(&mut self) -> Result<VersionState> {
        Ok(self.read()?.state)
    }

    async fn checkpoint(&mut self, target: &str, statements: u32) -> Result<()> {
        if target.is_empty() || statements == 0 {
            return Err(UpgradeError::Consistency(format!(
                "Invalid checkpoint: target '{}', statements {}",
                target, statements
            )));
        }
        let staged = self.stage()?;
        staged.state.target = Some(target.to_string());
        staged.state.statements = statements;
        Ok(())
    }

    async fn complete(&mut self, target: &str) -> Result<()> {
        let staged = self.stage()?;
        staged.state.version = Some(target.to_string());
        staged.state.target = None;
        staged.state.statements = 0;
        Ok(())
    }

    async fn update_spec(&mut self, spec: &str) -> Result<()> {
        let staged = self.stage()?;
        staged.state.control_spec = Some(spec.to_string());
        staged.tables_exist = true;
        Ok(())
    }

    async fn record(&mut self, entry: LogEntry) -> Result<()> {
        let staged = self.stage()?;
        if staged.tables_exist {
            staged.log.push(entry);
        }
        Ok(())
    }

    async fn revert_history(&mut self, versions: &[Version]) -> Result<()> {
        let staged = self.stage()?;
        for entry in staged.log.iter_mut() {
            if versions.iter().any(|v| entry.is_completion_of(v)) {
                entry.outcome = LogOutcome::Reverted;
            }
        }
        Ok(())
    }

    async fn history_contains(&mut self, version: &str) -> Result<bool> {
        Ok(self.read()?.log.iter().any(|e| e.is_completion_of(version)))
    }

    async fn entries(&mut self) -> Result<Vec<LogEntry>> {
        Ok(self.read()?.log)
    }

    async fn ensure_control_tables(&mut self) -> Result<()> {
        if self.read()?.tables_exist {
            return Ok(());
        }
        let staged = self.stage()?;
        staged.tables_exist = true;
        staged.state.control_spec = Some(CURRENT_CONTROL_SPEC.to_string());
        self.commit().await
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(staged) = self.staged.take() {
            *self.committed.lock()? = staged;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.staged = None;
        Ok(())
    }
}
