use super::{ControlTables, Definition, SegmentBody, SegmentDeclaration, normalize_source};
use crate::core::{Command, Result, SegmentKind, SourceLocation};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DefinitionDocument {
    #[serde(default)]
    control_tables: Option<ControlTablesDocument>,
    definition: Vec<DeclarationDocument>,
    #[serde(default)]
    segments: Vec<BodyDocument>,
}

#[derive(Debug, Deserialize)]
struct ControlTablesDocument {
    version_table: String,
    log_table: String,
}

#[derive(Debug, Deserialize)]
struct DeclarationDocument {
    kind: SegmentKind,
    #[serde(default)]
    source: Option<String>,
    target: String,
    #[serde(default)]
    open: bool,
    #[serde(default)]
    line: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct BodyDocument {
    kind: SegmentKind,
    #[serde(default)]
    source: Option<String>,
    target: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    commands: Vec<CommandDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandDocument {
    Sql(String),
    Statement {
        sql: String,
        #[serde(default)]
        line: Option<u32>,
    },
    Directive {
        directive: String,
        #[serde(default)]
        line: Option<u32>,
    },
}

/// Parses a JSON definition document. Missing line numbers fall back to
/// positions inside the document so diagnostics still point somewhere.
pub(super) fn parse(text: &str, resource: Option<String>) -> Result<Definition> {
    let document: DefinitionDocument = serde_json::from_str(text)?;

    let control_tables = document
        .control_tables
        .map(|tables| ControlTables::new(tables.version_table, tables.log_table))
        .unwrap_or_default();
    control_tables.validate()?;

    let declarations = document
        .definition
        .into_iter()
        .enumerate()
        .map(|(index, decl)| SegmentDeclaration {
            kind: decl.kind,
            source: normalize_source(decl.source),
            target: decl.target,
            open: decl.open,
            location: SourceLocation::new(
                resource.clone(),
                decl.line.unwrap_or(index as u32 + 1),
            ),
        })
        .collect();

    let bodies = document
        .segments
        .into_iter()
        .enumerate()
        .map(|(index, body)| {
            let body_line = body.line.unwrap_or(index as u32 + 1);
            let commands = body
                .commands
                .into_iter()
                .enumerate()
                .map(|(offset, command)| {
                    let fallback = body_line + offset as u32 + 1;
                    match command {
                        CommandDocument::Sql(sql) => {
                            Command::statement(sql, SourceLocation::new(resource.clone(), fallback))
                        }
                        CommandDocument::Statement { sql, line } => Command::statement(
                            sql,
                            SourceLocation::new(resource.clone(), line.unwrap_or(fallback)),
                        ),
                        CommandDocument::Directive { directive, line } => Command::directive(
                            directive,
                            SourceLocation::new(resource.clone(), line.unwrap_or(fallback)),
                        ),
                    }
                })
                .collect();
            SegmentBody {
                kind: body.kind,
                source: normalize_source(body.source),
                target: body.target,
                commands,
                location: SourceLocation::new(resource.clone(), body_line),
            }
        })
        .collect();

    Ok(Definition {
        resource,
        control_tables,
        declarations,
        bodies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "control_tables": { "version_table": "APPVERSION", "log_table": "APPVERSIONLOG" },
        "definition": [
            { "kind": "init", "source": "", "target": "1.1" },
            { "kind": "patch", "source": "", "target": "1.0.1" },
            { "kind": "branch", "source": "1.0.1", "target": "2.0", "open": true }
        ],
        "segments": [
            { "kind": "upgrade", "source": "", "target": "1.0.1", "line": 10, "commands": [
                "CREATE TABLE users (id INTEGER)",
                { "directive": "IGNORE SQL ERROR 1" },
                { "sql": "CREATE TABLE users (id INTEGER)", "line": 14 },
                { "directive": "/IGNORE SQL ERROR" }
            ] }
        ]
    }"#;

    #[test]
    fn test_parse_document() {
        let definition = parse(DOCUMENT, Some("upgrade.json".into())).unwrap();

        assert_eq!(definition.control_tables.version_table, "APPVERSION");
        assert_eq!(definition.declarations.len(), 3);
        assert_eq!(definition.declarations[0].kind, SegmentKind::Setup);
        assert_eq!(definition.declarations[0].source, None);
        assert_eq!(definition.declarations[1].kind, SegmentKind::Upgrade);
        assert_eq!(definition.declarations[2].kind, SegmentKind::Switch);
        assert!(definition.declarations[2].open);

        let body = &definition.bodies[0];
        assert_eq!(body.source, None);
        assert_eq!(body.commands.len(), 4);
        assert!(body.commands[0].is_persistent());
        assert_eq!(body.commands[0].location().line, 11);
        assert!(!body.commands[1].is_persistent());
        assert_eq!(body.commands[2].location().line, 14);
        assert_eq!(
            body.commands[2].location().resource.as_deref(),
            Some("upgrade.json")
        );
    }

    #[test]
    fn test_default_control_tables() {
        let definition = parse(r#"{ "definition": [] }"#, None).unwrap();
        assert_eq!(definition.control_tables, ControlTables::default());
    }

    #[test]
    fn test_rejects_bad_table_names() {
        let text = r#"{
            "control_tables": { "version_table": "X; DROP TABLE Y", "log_table": "L" },
            "definition": []
        }"#;
        assert!(parse(text, None).is_err());
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let text = r#"{ "definition": [ { "kind": "sideways", "target": "1" } ] }"#;
        assert!(parse(text, None).is_err());
    }
}
