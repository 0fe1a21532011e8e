use crate::core::types::SourceLocation;
use std::fmt;
use thiserror::Error;

/// A statement rejected by the database driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementFailure {
    /// Driver specific error code (SQLSTATE, SQLite extended result code, ...).
    pub code: String,
    pub message: String,
}

impl StatementFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for StatementFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StatementFailure {}

#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("Definition error: {0}")]
    Definition(String),

    #[error("More than one possible target found for {target}: {candidates:?}")]
    TargetAmbiguous {
        target: String,
        candidates: Vec<String>,
    },

    #[error("Target {target} is not reachable from version {from}")]
    TargetUnreachable { target: String, from: String },

    #[error("Statement failed at {location}: {failure}\n{command}")]
    Statement {
        location: SourceLocation,
        command: String,
        #[source]
        failure: StatementFailure,
    },

    #[error("Aborted by operator")]
    Aborted,

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Directive error at {location}: {message}")]
    Directive {
        location: SourceLocation,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl UpgradeError {
    /// True for failures that leave the version state resumable.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Statement { .. } | Self::Aborted)
    }
}

pub type Result<T> = std::result::Result<T, UpgradeError>;

impl<T> From<std::sync::PoisonError<T>> for UpgradeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<rusqlite::Error> for UpgradeError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<std::io::Error> for UpgradeError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for UpgradeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Definition(err.to_string())
    }
}

impl From<toml::de::Error> for UpgradeError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
