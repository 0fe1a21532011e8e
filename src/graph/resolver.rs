use super::{Path, PathPolicy, SegmentGraph};
use crate::core::{Result, Segment, UpgradeError, Version, display_version};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

impl SegmentGraph {
    /// Outgoing segments that may be traversed under the downgrade setting.
    fn usable(&self, source: Option<&str>, allow_downgrade: bool) -> Vec<Arc<Segment>> {
        self.outgoing(source)
            .iter()
            .filter(|segment| allow_downgrade || !segment.is_downgrade())
            .cloned()
            .collect()
    }

    /// Determines the best path between two versions.
    ///
    /// Returns an empty path when source and target are equal and `None` when
    /// no path exists. Open segments may end a path but are never passed.
    pub fn resolve_path(
        &self,
        source: Option<&str>,
        target: Option<&str>,
        allow_downgrade: bool,
        policy: &dyn PathPolicy,
    ) -> Option<Path> {
        let mut visited = HashSet::new();
        visited.insert(source.map(str::to_string));
        self.resolve_from(source, target, allow_downgrade, policy, &mut visited)
    }

    fn resolve_from(
        &self,
        source: Option<&str>,
        target: Option<&str>,
        allow_downgrade: bool,
        policy: &dyn PathPolicy,
        visited: &mut HashSet<Option<Version>>,
    ) -> Option<Path> {
        let mut result = Path::new();

        if source == target {
            return Some(result);
        }

        // Plain chains are followed without recursion
        let mut candidates = self.usable(source, allow_downgrade);
        while candidates.len() == 1 {
            let segment = candidates.remove(0);
            if !visited.insert(Some(segment.target().to_string())) {
                return None;
            }
            result.push(segment.clone());
            if target == Some(segment.target()) {
                return Some(result);
            }
            if segment.is_open() {
                return None;
            }
            candidates = self.usable(Some(segment.target()), allow_downgrade);
        }

        if candidates.is_empty() {
            return None;
        }

        let mut selected: Option<Path> = None;
        for segment in candidates {
            let next = Some(segment.target().to_string());
            if visited.contains(&next) {
                continue;
            }
            if segment.is_open() && target != Some(segment.target()) {
                continue;
            }

            let mut branch_visited = visited.clone();
            branch_visited.insert(next);
            let Some(mut path) = self.resolve_from(
                Some(segment.target()),
                target,
                allow_downgrade,
                policy,
                &mut branch_visited,
            ) else {
                continue;
            };
            path.prepend(segment);

            selected = match selected {
                Some(best) if !policy.better_than(&path, &best) => Some(best),
                _ => Some(path),
            };
        }

        let selected = selected?;
        result.extend(selected);
        Some(result)
    }

    /// Collects every version reachable from `source`, in breadth-first order.
    ///
    /// When `targeting` is set the database is part way through the segment
    /// towards that version, so only that segment seeds the search and
    /// `source` itself is no longer considered reachable.
    pub fn collect_reachable(
        &self,
        source: Option<&str>,
        targeting: Option<&str>,
        allow_downgrade: bool,
    ) -> Result<Vec<Option<Version>>> {
        if !self.knows(source) {
            return Err(UpgradeError::Consistency(format!(
                "The current database version {} is not available in the upgrade definition. \
                 Maybe this version is deprecated or the wrong definition is used.",
                display_version(source)
            )));
        }

        let mut result: Vec<Option<Version>> = Vec::new();
        let mut seen: HashSet<Option<Version>> = HashSet::new();
        if targeting.is_none() {
            let source = source.map(str::to_string);
            seen.insert(source.clone());
            result.push(source);
        }

        let outgoing = self.outgoing(source);
        let mut queue: VecDeque<Arc<Segment>> = match targeting {
            Some(targeting) => {
                let seeded: VecDeque<_> = outgoing
                    .iter()
                    .filter(|segment| segment.target() == targeting)
                    .cloned()
                    .collect();
                if seeded.is_empty() {
                    return Err(UpgradeError::Consistency(format!(
                        "The database is incompletely upgraded to version {}, but that version \
                         is not reachable from version {}",
                        targeting,
                        display_version(source)
                    )));
                }
                seeded
            }
            None => outgoing.iter().cloned().collect(),
        };

        while let Some(segment) = queue.pop_front() {
            let target = Some(segment.target().to_string());
            if seen.contains(&target) {
                continue;
            }
            if segment.is_downgrade() && !allow_downgrade {
                continue;
            }
            seen.insert(target.clone());
            result.push(target);
            if !segment.is_open() {
                queue.extend(self.outgoing(Some(segment.target())).iter().cloned());
            }
        }

        Ok(result)
    }

    /// Reachable versions narrowed by prefix and optionally to tips, i.e.
    /// versions without a further UPGRADE segment matching the prefix.
    pub fn collect_targets(
        &self,
        source: Option<&str>,
        targeting: Option<&str>,
        tips: bool,
        allow_downgrade: bool,
        prefix: Option<&str>,
    ) -> Result<Vec<Option<Version>>> {
        let mut result = self.collect_reachable(source, targeting, allow_downgrade)?;

        if let Some(prefix) = prefix {
            result.retain(|version| {
                version
                    .as_deref()
                    .is_some_and(|version| version.starts_with(prefix))
            });
        }

        if tips {
            result.retain(|version| {
                !self.outgoing(version.as_deref()).iter().any(|segment| {
                    segment.is_upgrade()
                        && prefix.is_none_or(|prefix| segment.target().starts_with(prefix))
                })
            });
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DefinitionBuilder;
    use crate::graph::{FewestSwitches, ShortestPath};
    use std::collections::BTreeSet;

    fn branched(open_at: Option<(&str, &str)>) -> SegmentGraph {
        let mut builder = DefinitionBuilder::new();
        let edges: &[(&str, &str, bool)] = &[
            ("1.1", "1.2", false),
            ("1.2", "1.3", false),
            ("1.3", "1.4", false),
            ("1.4", "1.5", false),
            ("1.5", "2.1", true),
            ("1.3", "2.1", false),
            ("2.1", "2.2", false),
            ("2.2", "2.3", false),
            ("2.3", "2.4", false),
            ("2.4", "2.5", false),
            ("2.5", "3.1", true),
            ("2.3", "3.1", false),
            ("3.1", "3.2", false),
        ];
        for (source, target, switch) in edges {
            builder = if open_at == Some((*source, *target)) {
                builder.open_upgrade(Some(source), target, &[])
            } else if *switch {
                builder.switch(Some(source), target, &[])
            } else {
                builder.upgrade(Some(source), target, &[])
            };
        }
        SegmentGraph::from_definition(builder.build()).unwrap()
    }

    fn set(versions: Vec<Option<Version>>) -> BTreeSet<String> {
        versions.into_iter().map(|v| v.unwrap_or_default()).collect()
    }

    fn expected(versions: &[&str]) -> BTreeSet<String> {
        versions.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_collect_tip_versions() {
        let graph = branched(None);

        let tips = graph
            .collect_targets(Some("1.1"), None, true, false, None)
            .unwrap();
        assert_eq!(set(tips), expected(&["1.5", "2.5", "3.2"]));

        let tips = graph
            .collect_targets(Some("1.3"), Some("2.1"), true, false, None)
            .unwrap();
        assert_eq!(set(tips), expected(&["2.5", "3.2"]));

        let path = graph
            .resolve_path(Some("1.3"), Some("2.1"), false, &ShortestPath)
            .unwrap();
        assert_eq!(path.targets(), vec!["2.1"]);
    }

    #[test]
    fn test_collect_tip_versions_with_prefix() {
        let graph = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .upgrade(Some("1.1"), "1.2", &[])
                .upgrade(Some("1.2"), "1.3", &[])
                .upgrade(Some("1.3"), "1.4", &[])
                .upgrade(Some("1.4"), "2.1", &[])
                .upgrade(Some("2.1"), "2.2", &[])
                .upgrade(Some("2.2"), "2.3", &[])
                .upgrade(Some("2.3"), "2.4", &[])
                .build(),
        )
        .unwrap();

        let tips = graph
            .collect_targets(Some("1.1"), None, true, false, Some("1."))
            .unwrap();
        assert_eq!(set(tips), expected(&["1.4"]));
    }

    #[test]
    fn test_open_segment_is_a_barrier() {
        let graph = branched(Some(("2.1", "2.2")));

        let reachable = graph
            .collect_targets(Some("1.1"), None, false, false, None)
            .unwrap();
        assert_eq!(
            set(reachable),
            expected(&["1.1", "1.2", "1.3", "1.4", "1.5", "2.1", "2.2"])
        );

        assert!(graph
            .resolve_path(Some("1.1"), Some("2.3"), false, &ShortestPath)
            .is_none());
        let path = graph
            .resolve_path(Some("1.1"), Some("2.2"), false, &ShortestPath)
            .unwrap();
        assert_eq!(path.targets(), vec!["1.2", "1.3", "2.1", "2.2"]);
    }

    #[test]
    fn test_simple_open_barrier() {
        let graph = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .open_upgrade(Some("A"), "B", &[])
                .upgrade(Some("B"), "C", &[])
                .build(),
        )
        .unwrap();

        let reachable = graph.collect_reachable(Some("A"), None, false).unwrap();
        assert_eq!(set(reachable), expected(&["A", "B"]));
    }

    #[test]
    fn test_chain_path() {
        let graph = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .upgrade(Some("A"), "B", &[])
                .upgrade(Some("B"), "C", &[])
                .upgrade(Some("C"), "D", &[])
                .build(),
        )
        .unwrap();

        let path = graph
            .resolve_path(Some("A"), Some("D"), false, &ShortestPath)
            .unwrap();
        assert_eq!(path.targets(), vec!["B", "C", "D"]);

        let empty = graph
            .resolve_path(Some("B"), Some("B"), false, &ShortestPath)
            .unwrap();
        assert!(empty.is_empty());

        assert!(graph
            .resolve_path(Some("D"), Some("A"), true, &ShortestPath)
            .is_none());
    }

    #[test]
    fn test_diamond_is_deterministic() {
        let graph = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .upgrade(Some("A"), "B", &[])
                .upgrade(Some("A"), "C", &[])
                .upgrade(Some("B"), "D", &[])
                .upgrade(Some("C"), "D", &[])
                .build(),
        )
        .unwrap();

        for _ in 0..5 {
            let path = graph
                .resolve_path(Some("A"), Some("D"), false, &ShortestPath)
                .unwrap();
            assert_eq!(path.targets(), vec!["B", "D"]);
        }
    }

    #[test]
    fn test_shortest_branch_wins() {
        let graph = branched(None);

        let path = graph
            .resolve_path(Some("1.1"), Some("3.2"), false, &ShortestPath)
            .unwrap();
        assert_eq!(path.targets(), vec!["1.2", "1.3", "2.1", "2.2", "2.3", "3.1", "3.2"]);

        let path = graph
            .resolve_path(Some("1.1"), Some("3.2"), false, &FewestSwitches)
            .unwrap();
        assert_eq!(path.switches(), 0);
    }

    #[test]
    fn test_downgrade_isolation() {
        let graph = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .upgrade(Some("A"), "C", &[])
                .downgrade(Some("C"), "B", &[])
                .upgrade(Some("A"), "B", &[])
                .build(),
        )
        .unwrap();

        assert!(graph
            .resolve_path(Some("C"), Some("B"), false, &ShortestPath)
            .is_none());
        let path = graph
            .resolve_path(Some("C"), Some("B"), true, &ShortestPath)
            .unwrap();
        assert!(path.has_downgrade());

        let reachable = graph.collect_reachable(Some("C"), None, false).unwrap();
        assert_eq!(set(reachable), expected(&["C"]));
        let reachable = graph.collect_reachable(Some("C"), None, true).unwrap();
        assert_eq!(set(reachable), expected(&["C", "B"]));
    }

    #[test]
    fn test_downgrade_not_preferred_on_tie() {
        let graph = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .downgrade(Some("X"), "Y", &[])
                .switch(Some("X"), "Z", &[])
                .upgrade(Some("Y"), "T", &[])
                .upgrade(Some("Z"), "T", &[])
                .build(),
        )
        .unwrap();

        let path = graph
            .resolve_path(Some("X"), Some("T"), true, &ShortestPath)
            .unwrap();
        assert_eq!(path.targets(), vec!["Z", "T"]);
    }

    #[test]
    fn test_cycle_is_not_a_path() {
        let graph = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .upgrade(Some("A"), "B", &[])
                .upgrade(Some("B"), "A", &[])
                .upgrade(Some("C"), "D", &[])
                .build(),
        )
        .unwrap();

        assert!(graph
            .resolve_path(Some("A"), Some("D"), false, &ShortestPath)
            .is_none());
    }

    #[test]
    fn test_unknown_version_is_a_consistency_error() {
        let graph = branched(None);

        let result = graph.collect_reachable(Some("9.9"), None, false);
        assert!(matches!(result, Err(UpgradeError::Consistency(_))));
    }

    #[test]
    fn test_unreachable_targeting_is_a_consistency_error() {
        let graph = branched(None);

        let result = graph.collect_reachable(Some("1.1"), Some("3.2"), false);
        assert!(matches!(result, Err(UpgradeError::Consistency(_))));
    }

    #[test]
    fn test_tips_from_fresh_database() {
        let graph = SegmentGraph::from_definition(
            DefinitionBuilder::new()
                .upgrade(None, "A", &[])
                .upgrade(Some("A"), "B", &[])
                .build(),
        )
        .unwrap();

        let tips = graph.collect_targets(None, None, true, false, None).unwrap();
        assert_eq!(tips, vec![Some("B".to_string())]);

        let all = graph.collect_targets(None, None, false, false, None).unwrap();
        assert_eq!(all, vec![None, Some("A".to_string()), Some("B".to_string())]);
    }
}
