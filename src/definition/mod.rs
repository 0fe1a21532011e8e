//! Structured change definitions.
//!
//! A definition has two halves, mirroring how change files are authored: a
//! declaration list naming every segment of the version graph, and a list of
//! segment bodies holding the commands. The [`SegmentGraph`](crate::graph::SegmentGraph)
//! checks that both halves agree.

pub mod builder;
pub mod document;

pub use builder::DefinitionBuilder;

use crate::core::{Command, Result, SegmentKind, SourceLocation, UpgradeError, Version};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

pub const DEFAULT_VERSION_TABLE: &str = "DBVERSION";
pub const DEFAULT_LOG_TABLE: &str = "DBVERSIONLOG";

lazy_static! {
    static ref TABLE_NAME_PATTERN: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap();
}

/// Names of the two tables the engine keeps its own state in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTables {
    pub version_table: String,
    pub log_table: String,
}

impl Default for ControlTables {
    fn default() -> Self {
        Self {
            version_table: DEFAULT_VERSION_TABLE.to_string(),
            log_table: DEFAULT_LOG_TABLE.to_string(),
        }
    }
}

impl ControlTables {
    pub fn new(version_table: impl Into<String>, log_table: impl Into<String>) -> Self {
        Self {
            version_table: version_table.into(),
            log_table: log_table.into(),
        }
    }

    /// Table names end up inside generated SQL, so only plain identifiers pass.
    pub fn validate(&self) -> Result<()> {
        for name in [&self.version_table, &self.log_table] {
            if !TABLE_NAME_PATTERN.is_match(name) {
                return Err(UpgradeError::Definition(format!(
                    "Invalid control table name '{}'",
                    name
                )));
            }
        }
        if self.version_table.eq_ignore_ascii_case(&self.log_table) {
            return Err(UpgradeError::Definition(
                "Version table and log table must be different tables".to_string(),
            ));
        }
        Ok(())
    }
}

/// One line of the declaration section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDeclaration {
    pub kind: SegmentKind,
    pub source: Option<Version>,
    pub target: Version,
    pub open: bool,
    pub location: SourceLocation,
}

/// The located body of a segment.
#[derive(Debug, Clone)]
pub struct SegmentBody {
    pub kind: SegmentKind,
    pub source: Option<Version>,
    pub target: Version,
    pub commands: Vec<Command>,
    pub location: SourceLocation,
}

/// Everything the engine needs from a change definition.
#[derive(Debug, Clone, Default)]
pub struct Definition {
    pub resource: Option<String>,
    pub control_tables: ControlTables,
    pub declarations: Vec<SegmentDeclaration>,
    pub bodies: Vec<SegmentBody>,
}

impl Definition {
    /// Loads a JSON definition document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            UpgradeError::IoError(format!("Failed to read '{}': {}", path.display(), err))
        })?;
        document::parse(&text, Some(path.display().to_string()))
    }

    /// Parses a JSON definition document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        document::parse(text, None)
    }

    pub fn builder() -> DefinitionBuilder {
        DefinitionBuilder::new()
    }
}

/// Empty source strings mean "no version".
pub(crate) fn normalize_source(source: Option<String>) -> Option<Version> {
    source.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_table_validation() {
        assert!(ControlTables::default().validate().is_ok());
        assert!(ControlTables::new("app.DBVERSION", "app.DBVERSIONLOG").validate().is_ok());
        assert!(ControlTables::new("DBVERSION; DROP", "LOG").validate().is_err());
        assert!(ControlTables::new("same", "SAME").validate().is_err());
    }

    #[test]
    fn test_normalize_source() {
        assert_eq!(normalize_source(Some(String::new())), None);
        assert_eq!(normalize_source(None), None);
        assert_eq!(normalize_source(Some("1.0".into())), Some("1.0".to_string()));
    }
}
