use crate::core::Segment;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An ordered list of segments leading from one version to another.
#[derive(Debug, Clone, Default)]
pub struct Path {
    segments: Vec<Arc<Segment>>,
    switches: usize,
    downgrades: usize,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    fn analyze(&mut self, segment: &Segment) {
        if segment.is_downgrade() {
            self.downgrades += 1;
        } else if segment.is_switch() {
            self.switches += 1;
        }
    }

    pub fn push(&mut self, segment: Arc<Segment>) {
        self.analyze(&segment);
        self.segments.push(segment);
    }

    pub fn prepend(&mut self, segment: Arc<Segment>) {
        self.analyze(&segment);
        self.segments.insert(0, segment);
    }

    pub fn extend(&mut self, other: Path) {
        self.switches += other.switches;
        self.downgrades += other.downgrades;
        self.segments.extend(other.segments);
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn has_downgrade(&self) -> bool {
        self.downgrades > 0
    }

    pub fn switches(&self) -> usize {
        self.switches
    }

    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Segment>> {
        self.segments.iter()
    }

    /// Target versions along the path, in order.
    pub fn targets(&self) -> Vec<&str> {
        self.segments.iter().map(|s| s.target()).collect()
    }
}

impl IntoIterator for Path {
    type Item = Arc<Segment>;
    type IntoIter = std::vec::IntoIter<Arc<Segment>>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.into_iter()
    }
}

/// Decides between two candidate paths at a branching version.
///
/// Candidates are offered in declaration order; returning `false` on a tie
/// keeps the one found first, which keeps resolution deterministic.
pub trait PathPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `candidate` should replace the currently `selected` path.
    fn better_than(&self, candidate: &Path, selected: &Path) -> bool;
}

/// Fewer segments first, then paths without downgrades.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortestPath;

impl PathPolicy for ShortestPath {
    fn name(&self) -> &'static str {
        "shortest"
    }

    fn better_than(&self, candidate: &Path, selected: &Path) -> bool {
        if candidate.len() != selected.len() {
            return candidate.len() < selected.len();
        }
        !candidate.has_downgrade() && selected.has_downgrade()
    }
}

/// Paths without downgrades first, then the fewest branch switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct FewestSwitches;

impl PathPolicy for FewestSwitches {
    fn name(&self) -> &'static str {
        "fewest-switches"
    }

    fn better_than(&self, candidate: &Path, selected: &Path) -> bool {
        if candidate.has_downgrade() != selected.has_downgrade() {
            return !candidate.has_downgrade();
        }
        candidate.switches() < selected.switches()
    }
}

/// Configurable selection of a built-in [`PathPolicy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathPolicyKind {
    #[default]
    Shortest,
    FewestSwitches,
}

impl PathPolicyKind {
    pub fn into_policy(self) -> Box<dyn PathPolicy> {
        match self {
            Self::Shortest => Box::new(ShortestPath),
            Self::FewestSwitches => Box::new(FewestSwitches),
        }
    }
}
