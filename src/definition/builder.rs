use super::{ControlTables, Definition, SegmentBody, SegmentDeclaration};
use crate::core::{Command, SegmentKind, SourceLocation};

/// Programmatic construction of a [`Definition`].
///
/// ```
/// use schemalift::definition::DefinitionBuilder;
///
/// let definition = DefinitionBuilder::new()
///     .upgrade(None, "1.0.1", &["CREATE TABLE users (id INTEGER)"])
///     .upgrade(Some("1.0.1"), "1.0.2", &["ALTER TABLE users ADD COLUMN name TEXT"])
///     .build();
/// assert_eq!(definition.declarations.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct DefinitionBuilder {
    definition: Definition,
    next_line: u32,
}

impl DefinitionBuilder {
    pub fn new() -> Self {
        Self {
            definition: Definition::default(),
            next_line: 1,
        }
    }

    /// Set the resource name used in diagnostics
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.definition.resource = Some(resource.into());
        self
    }

    /// Set the control table names
    pub fn control_tables(mut self, version_table: &str, log_table: &str) -> Self {
        self.definition.control_tables = ControlTables::new(version_table, log_table);
        self
    }

    /// Declare a segment without giving it a body.
    pub fn declare(mut self, kind: SegmentKind, source: Option<&str>, target: &str, open: bool) -> Self {
        let location = self.location();
        self.definition.declarations.push(SegmentDeclaration {
            kind,
            source: source.map(str::to_string),
            target: target.to_string(),
            open,
            location,
        });
        self
    }

    /// Add a body without declaring it.
    pub fn body(
        mut self,
        kind: SegmentKind,
        source: Option<&str>,
        target: &str,
        commands: Vec<Command>,
    ) -> Self {
        let location = self.location();
        self.next_line += commands.len() as u32;
        self.definition.bodies.push(SegmentBody {
            kind,
            source: source.map(str::to_string),
            target: target.to_string(),
            commands,
            location,
        });
        self
    }

    /// Declare a segment and give it a body in one go.
    pub fn segment(
        self,
        kind: SegmentKind,
        source: Option<&str>,
        target: &str,
        open: bool,
        commands: Vec<Command>,
    ) -> Self {
        self.declare(kind, source, target, open)
            .body(kind, source, target, commands)
    }

    pub fn setup(self, source: Option<&str>, target: &str, statements: &[&str]) -> Self {
        let commands = self.statements(statements);
        self.segment(SegmentKind::Setup, source, target, false, commands)
    }

    pub fn upgrade(self, source: Option<&str>, target: &str, statements: &[&str]) -> Self {
        let commands = self.statements(statements);
        self.segment(SegmentKind::Upgrade, source, target, false, commands)
    }

    pub fn open_upgrade(self, source: Option<&str>, target: &str, statements: &[&str]) -> Self {
        let commands = self.statements(statements);
        self.segment(SegmentKind::Upgrade, source, target, true, commands)
    }

    pub fn switch(self, source: Option<&str>, target: &str, statements: &[&str]) -> Self {
        let commands = self.statements(statements);
        self.segment(SegmentKind::Switch, source, target, false, commands)
    }

    pub fn downgrade(self, source: Option<&str>, target: &str, statements: &[&str]) -> Self {
        let commands = self.statements(statements);
        self.segment(SegmentKind::Downgrade, source, target, false, commands)
    }

    pub fn build(self) -> Definition {
        self.definition
    }

    fn location(&mut self) -> SourceLocation {
        let location = SourceLocation::new(self.definition.resource.clone(), self.next_line);
        self.next_line += 1;
        location
    }

    fn statements(&self, statements: &[&str]) -> Vec<Command> {
        statements
            .iter()
            .enumerate()
            .map(|(offset, sql)| {
                Command::statement(
                    *sql,
                    SourceLocation::new(
                        self.definition.resource.clone(),
                        self.next_line + offset as u32 + 1,
                    ),
                )
            })
            .collect()
    }
}
