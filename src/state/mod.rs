//! Durable version state and the audit log.
//!
//! The store is the only writer of the control tables. Writes are staged on
//! the control connection and become durable on [`VersionStore::commit`], so
//! a statement and the checkpoint that records it can share a transaction.

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryControlHandle, MemoryVersionStore};
pub use sqlite::SqliteVersionStore;

use crate::core::{Result, Version};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Control spec written by stores that create their own tables.
pub const CURRENT_CONTROL_SPEC: &str = "1.1";

/// Longest command or result text kept in the log table.
pub const MAX_LOG_TEXT: usize = 3000;

pub(crate) const RESULT_COMPLETE: &str = "COMPLETE";
pub(crate) const RESULT_DOWNGRADED: &str = "DOWNGRADED";
const RESULT_IGNORED_PREFIX: &str = "IGNORED ";

/// The single row of the version table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionState {
    pub version: Option<Version>,
    /// Set while a segment towards this version is partially applied.
    pub target: Option<Version>,
    /// Persistent statements of the in-flight segment that are done.
    pub statements: u32,
    pub control_spec: Option<String>,
}

impl VersionState {
    pub fn is_in_progress(&self) -> bool {
        self.target.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogKind {
    /// One attempted persistent statement.
    Statement,
    /// A completed (or later reverted) segment.
    Segment,
}

impl LogKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Statement => "S",
            Self::Segment => "B",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "S" => Some(Self::Statement),
            "B" => Some(Self::Segment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum LogOutcome {
    Success,
    /// The statement failed with an error code from the active ignore set.
    Ignored(String),
    Failed(String),
    Complete,
    Reverted,
}

impl LogOutcome {
    /// Value stored in the RESULT column.
    pub fn to_column(&self) -> Option<String> {
        match self {
            Self::Success => None,
            Self::Ignored(detail) => Some(format!("{}{}", RESULT_IGNORED_PREFIX, detail)),
            Self::Failed(detail) => Some(detail.clone()),
            Self::Complete => Some(RESULT_COMPLETE.to_string()),
            Self::Reverted => Some(RESULT_DOWNGRADED.to_string()),
        }
    }

    pub fn from_column(value: Option<String>) -> Self {
        match value {
            None => Self::Success,
            Some(value) if value == RESULT_COMPLETE => Self::Complete,
            Some(value) if value == RESULT_DOWNGRADED => Self::Reverted,
            Some(value) => match value.strip_prefix(RESULT_IGNORED_PREFIX) {
                Some(detail) => Self::Ignored(detail.to_string()),
                None => Self::Failed(value),
            },
        }
    }
}

/// One row of the log table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub source: Option<Version>,
    pub target: Version,
    pub ordinal: u32,
    pub stamp: DateTime<Utc>,
    pub command: Option<String>,
    #[serde(flatten)]
    pub outcome: LogOutcome,
}

impl LogEntry {
    pub fn statement(
        source: Option<&str>,
        target: &str,
        ordinal: u32,
        command: &str,
        outcome: LogOutcome,
    ) -> Self {
        Self {
            kind: LogKind::Statement,
            source: source.map(str::to_string),
            target: target.to_string(),
            ordinal,
            stamp: Utc::now(),
            command: Some(truncate(command).to_string()),
            outcome: truncate_outcome(outcome),
        }
    }

    pub fn completed(source: Option<&str>, target: &str, ordinal: u32) -> Self {
        Self {
            kind: LogKind::Segment,
            source: source.map(str::to_string),
            target: target.to_string(),
            ordinal,
            stamp: Utc::now(),
            command: None,
            outcome: LogOutcome::Complete,
        }
    }

    pub fn is_completion_of(&self, version: &str) -> bool {
        self.kind == LogKind::Segment
            && self.target == version
            && self.outcome == LogOutcome::Complete
    }
}

/// Cuts text down to [`MAX_LOG_TEXT`] characters.
pub fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_LOG_TEXT) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

fn truncate_outcome(outcome: LogOutcome) -> LogOutcome {
    match outcome {
        LogOutcome::Ignored(detail) => LogOutcome::Ignored(truncate(&detail).to_string()),
        LogOutcome::Failed(detail) => LogOutcome::Failed(truncate(&detail).to_string()),
        other => other,
    }
}

/// Persistence for [`VersionState`] and the audit log.
#[async_trait]
pub trait VersionStore: Send {
    /// Name of the connection whose transaction the staged writes join.
    fn connection_name(&self) -> &str;

    /// Reads the version row; a missing row or table yields the defaults.
    async fn load(&mut self) -> Result<VersionState>;

    /// Records that `statements` persistent statements towards `target` are done.
    async fn checkpoint(&mut self, target: &str, statements: u32) -> Result<()>;

    /// Marks the segment towards `target` as fully applied.
    async fn complete(&mut self, target: &str) -> Result<()>;

    async fn update_spec(&mut self, spec: &str) -> Result<()>;

    async fn record(&mut self, entry: LogEntry) -> Result<()>;

    /// Flips earlier completion rows of the given versions to reverted.
    async fn revert_history(&mut self, versions: &[Version]) -> Result<()>;

    /// Whether `version` was ever completed and not reverted since.
    async fn history_contains(&mut self, version: &str) -> Result<bool>;

    async fn entries(&mut self) -> Result<Vec<LogEntry>>;

    /// Creates the control tables when they are missing.
    async fn ensure_control_tables(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}
