//! The version graph: segments indexed by source version.

pub mod path;
mod resolver;

pub use path::{FewestSwitches, Path, PathPolicy, PathPolicyKind, ShortestPath};

use crate::core::{Result, Segment, SegmentKind, UpgradeError, Version, display_version};
use crate::definition::{ControlTables, Definition, SegmentBody, SegmentDeclaration};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

type SegmentKey = (bool, Option<Version>, Version);

/// Immutable graph built once from a [`Definition`].
#[derive(Debug, Clone, Default)]
pub struct SegmentGraph {
    segments: HashMap<Option<Version>, Vec<Arc<Segment>>>,
    setups: HashMap<Option<Version>, Arc<Segment>>,
    known_versions: HashSet<Option<Version>>,
    control_tables: ControlTables,
    resource: Option<String>,
}

impl SegmentGraph {
    /// Builds the graph and checks that declarations and bodies match one to one.
    pub fn from_definition(definition: Definition) -> Result<Self> {
        definition.control_tables.validate()?;

        let mut declared: Vec<(SegmentDeclaration, Option<SegmentBody>)> = Vec::new();
        let mut index = HashMap::<SegmentKey, usize>::new();

        for decl in definition.declarations {
            if decl.target.is_empty() {
                return Err(UpgradeError::Definition(format!(
                    "Segment declared at {} has an empty target version",
                    decl.location
                )));
            }
            let key = (
                decl.kind == SegmentKind::Setup,
                decl.source.clone(),
                decl.target.clone(),
            );
            if decl.kind == SegmentKind::Setup
                && declared
                    .iter()
                    .any(|(d, _)| d.kind == SegmentKind::Setup && d.source == decl.source)
            {
                return Err(UpgradeError::Definition(format!(
                    "Duplicate definition of setup segment for source version {} at {}",
                    display_version(decl.source.as_deref()),
                    decl.location
                )));
            }
            if index.contains_key(&key) {
                return Err(UpgradeError::Definition(format!(
                    "Duplicate definition of segment \"{}\" --> \"{}\" at {}",
                    decl.source.as_deref().unwrap_or(""),
                    decl.target,
                    decl.location
                )));
            }
            index.insert(key, declared.len());
            declared.push((decl, None));
        }

        for body in definition.bodies {
            let key = (
                body.kind == SegmentKind::Setup,
                body.source.clone(),
                body.target.clone(),
            );
            let Some(&position) = index.get(&key) else {
                return Err(UpgradeError::Definition(format!(
                    "Undefined {} segment found: \"{}\" --> \"{}\" at {}",
                    body.kind,
                    body.source.as_deref().unwrap_or(""),
                    body.target,
                    body.location
                )));
            };
            let (decl, slot) = &mut declared[position];
            if decl.kind != body.kind {
                return Err(UpgradeError::Definition(format!(
                    "Segment type '{}' at {} is different from its definition '{}'",
                    body.kind, body.location, decl.kind
                )));
            }
            if slot.is_some() {
                return Err(UpgradeError::Definition(format!(
                    "Duplicate segment \"{}\" --> \"{}\" found at {}",
                    body.source.as_deref().unwrap_or(""),
                    body.target,
                    body.location
                )));
            }
            *slot = Some(body);
        }

        let mut graph = SegmentGraph {
            control_tables: definition.control_tables,
            resource: definition.resource,
            ..Default::default()
        };

        for (decl, body) in declared {
            let Some(body) = body else {
                return Err(UpgradeError::Definition(format!(
                    "{} segment \"{}\" --> \"{}\" declared at {} not found",
                    decl.kind,
                    decl.source.as_deref().unwrap_or(""),
                    decl.target,
                    decl.location
                )));
            };

            let segment = Arc::new(
                Segment::new(decl.kind, decl.source.clone(), decl.target.clone(), decl.open)
                    .with_commands(body.commands, body.location),
            );

            if segment.is_setup() {
                if segment.is_open() {
                    return Err(UpgradeError::Definition(format!(
                        "Setup segment {} cannot be open",
                        segment
                    )));
                }
                graph.setups.insert(decl.source, segment);
            } else {
                graph.known_versions.insert(decl.source.clone());
                graph.known_versions.insert(Some(decl.target));
                graph.segments.entry(decl.source).or_default().push(segment);
            }
        }

        debug!(
            segments = graph.segment_count(),
            setups = graph.setups.len(),
            versions = graph.known_versions.len(),
            "segment graph built"
        );

        Ok(graph)
    }

    pub fn control_tables(&self) -> &ControlTables {
        &self.control_tables
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// All non-setup segments leaving `source`, in declaration order.
    pub fn outgoing(&self, source: Option<&str>) -> &[Arc<Segment>] {
        self.segments
            .get(&source.map(str::to_string))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The non-setup segment for the given edge, if declared.
    pub fn segment(&self, source: Option<&str>, target: &str) -> Option<&Arc<Segment>> {
        self.outgoing(source).iter().find(|s| s.target() == target)
    }

    pub fn knows(&self, version: Option<&str>) -> bool {
        self.known_versions.contains(&version.map(str::to_string))
    }

    pub fn segment_count(&self) -> usize {
        self.segments.values().map(Vec::len).sum()
    }

    pub fn has_setup(&self) -> bool {
        !self.setups.is_empty()
    }

    /// Follows the setup chain starting at the given control spec. Setup
    /// segments never branch, so the chain is unique.
    pub fn setup_path(&self, spec: Option<&str>) -> Vec<Arc<Segment>> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = spec.map(str::to_string);
        while let Some(segment) = self.setups.get(&cursor) {
            if !seen.insert(segment.target().to_string()) {
                break;
            }
            result.push(segment.clone());
            cursor = Some(segment.target().to_string());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Command, SourceLocation};
    use crate::definition::DefinitionBuilder;

    #[test]
    fn test_build_graph() {
        let graph = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .setup(None, "1.1", &["CREATE TABLE DBVERSION (VERSION TEXT)"])
                .upgrade(None, "1.0.1", &["CREATE TABLE a (id INTEGER)"])
                .upgrade(Some("1.0.1"), "1.0.2", &["CREATE TABLE b (id INTEGER)"])
                .build(),
        )
        .unwrap();

        assert_eq!(graph.segment_count(), 2);
        assert!(graph.has_setup());
        assert!(graph.knows(None));
        assert!(graph.knows(Some("1.0.2")));
        assert!(!graph.knows(Some("1.1")));
        assert_eq!(graph.setup_path(None).len(), 1);
        assert!(graph.setup_path(Some("1.1")).is_empty());
        assert_eq!(graph.outgoing(Some("1.0.1"))[0].target(), "1.0.2");
    }

    #[test]
    fn test_duplicate_segment_rejected() {
        let result = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .upgrade(None, "1.0.1", &[])
                .upgrade(None, "1.0.1", &[])
                .build(),
        );
        assert!(matches!(result, Err(UpgradeError::Definition(msg)) if msg.contains("Duplicate definition")));
    }

    #[test]
    fn test_duplicate_setup_source_rejected() {
        let result = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .setup(None, "1.0", &[])
                .setup(None, "1.1", &[])
                .build(),
        );
        assert!(matches!(result, Err(UpgradeError::Definition(msg)) if msg.contains("setup segment")));
    }

    #[test]
    fn test_missing_body_rejected() {
        let result = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .declare(SegmentKind::Upgrade, None, "1.0.1", false)
                .build(),
        );
        assert!(matches!(result, Err(UpgradeError::Definition(msg)) if msg.contains("not found")));
    }

    #[test]
    fn test_undeclared_body_rejected() {
        let result = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .body(
                    SegmentKind::Upgrade,
                    None,
                    "1.0.1",
                    vec![Command::statement("SELECT 1", SourceLocation::line(3))],
                )
                .build(),
        );
        assert!(matches!(result, Err(UpgradeError::Definition(msg)) if msg.contains("Undefined")));
    }

    #[test]
    fn test_body_kind_must_match_declaration() {
        let result = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .declare(SegmentKind::Switch, None, "2.0", false)
                .body(SegmentKind::Upgrade, None, "2.0", Vec::new())
                .build(),
        );
        assert!(matches!(result, Err(UpgradeError::Definition(msg)) if msg.contains("different")));
    }

    #[test]
    fn test_duplicate_body_rejected() {
        let result = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .upgrade(None, "1.0.1", &[])
                .body(SegmentKind::Upgrade, None, "1.0.1", Vec::new())
                .build(),
        );
        assert!(matches!(result, Err(UpgradeError::Definition(msg)) if msg.contains("Duplicate segment")));
    }
}
