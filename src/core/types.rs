use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque version label. `None` stands for a database that has never been upgraded.
pub type Version = String;

/// Renders an optional version the way it appears in messages.
pub fn display_version(version: Option<&str>) -> &str {
    version.unwrap_or("<no version>")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// Creates or maintains the control tables themselves.
    #[serde(alias = "init", alias = "SETUP", alias = "INIT")]
    Setup,
    /// Regular forward upgrade.
    #[serde(alias = "patch", alias = "UPGRADE", alias = "PATCH")]
    Upgrade,
    /// Moves the database onto another release line.
    #[serde(alias = "branch", alias = "return", alias = "SWITCH", alias = "BRANCH", alias = "RETURN")]
    Switch,
    /// Reverses an earlier upgrade; only followed when downgrades are allowed.
    #[serde(alias = "DOWNGRADE")]
    Downgrade,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Setup => "SETUP",
            Self::Upgrade => "UPGRADE",
            Self::Switch => "SWITCH",
            Self::Downgrade => "DOWNGRADE",
        };
        f.write_str(name)
    }
}

/// Where a segment or command was defined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub resource: Option<String>,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(resource: Option<String>, line: u32) -> Self {
        Self { resource, line }
    }

    pub fn line(line: u32) -> Self {
        Self {
            resource: None,
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{}:{}", resource, self.line),
            None => write!(f, "line {}", self.line),
        }
    }
}

/// A single unit of work inside a segment.
///
/// Persistent commands are sent to the database and counted towards the
/// checkpoint. Non-persistent commands are directives for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    persistent: bool,
    location: SourceLocation,
}

impl Command {
    pub fn statement(text: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            text: text.into(),
            persistent: true,
            location,
        }
    }

    pub fn directive(text: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            text: text.into(),
            persistent: false,
            location,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }
}

/// A typed, directed edge between two versions.
#[derive(Debug, Clone)]
pub struct Segment {
    kind: SegmentKind,
    source: Option<Version>,
    target: Version,
    open: bool,
    commands: Vec<Command>,
    location: SourceLocation,
}

impl Segment {
    pub fn new(
        kind: SegmentKind,
        source: Option<Version>,
        target: impl Into<Version>,
        open: bool,
    ) -> Self {
        Self {
            kind,
            source,
            target: target.into(),
            open,
            commands: Vec::new(),
            location: SourceLocation::default(),
        }
    }

    pub fn with_commands(mut self, commands: Vec<Command>, location: SourceLocation) -> Self {
        self.commands = commands;
        self.location = location;
        self
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_setup(&self) -> bool {
        self.kind == SegmentKind::Setup
    }

    pub fn is_upgrade(&self) -> bool {
        self.kind == SegmentKind::Upgrade
    }

    pub fn is_switch(&self) -> bool {
        self.kind == SegmentKind::Switch
    }

    pub fn is_downgrade(&self) -> bool {
        self.kind == SegmentKind::Downgrade
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    /// Number of commands that are sent to the database.
    pub fn persistent_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_persistent()).count()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} \"{}\" --> \"{}\"{}",
            self.kind,
            self.source.as_deref().unwrap_or(""),
            self.target,
            if self.open { " (open)" } else { "" }
        )
    }
}
