//! Dependency resolution for a task subset.

use super::{TaskCatalog, TaskGraph, TaskSpec};
use crate::errors::{ConfigError, CycleOrMissingDependencyError};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Resolves a catalog into dependency-respecting execution orders.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    catalog: Arc<TaskCatalog>,
}

impl GraphBuilder {
    /// Creates a builder over a catalog.
    #[must_use]
    pub fn new(catalog: Arc<TaskCatalog>) -> Self {
        Self { catalog }
    }

    /// Returns the catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<TaskCatalog> {
        &self.catalog
    }

    /// Builds a graph over the whole catalog.
    ///
    /// # Errors
    ///
    /// Returns `CycleOrMissingDependency` if the catalog contains a cycle.
    pub fn build_all(&self) -> Result<TaskGraph, ConfigError> {
        self.build(None)
    }

    /// Builds a graph restricted to `allow` (or the whole catalog when `None`).
    ///
    /// Dependencies outside the allow-list count as satisfied. Among ready
    /// tasks, the one listed first in the allow-list (or catalog) runs first.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTask` for allow-listed ids missing from the catalog and
    /// `CycleOrMissingDependency` when tasks remain that can never become ready.
    pub fn build(&self, allow: Option<&[String]>) -> Result<TaskGraph, ConfigError> {
        let members: Vec<&TaskSpec> = match allow {
            Some(ids) => {
                let mut seen = HashSet::new();
                let mut members = Vec::with_capacity(ids.len());
                for id in ids {
                    let spec = self
                        .catalog
                        .get(id)
                        .ok_or_else(|| ConfigError::UnknownTask { task: id.clone() })?;
                    if seen.insert(id.as_str()) {
                        members.push(spec);
                    }
                }
                members
            }
            None => self.catalog.iter().collect(),
        };

        let order = resolve_order(&members)?;
        let tasks = members
            .into_iter()
            .map(|spec| (spec.id.clone(), spec.clone()))
            .collect();
        Ok(TaskGraph::new(tasks, order))
    }
}

/// Kahn's algorithm over `members`, with ties broken by position in `members`.
fn resolve_order(members: &[&TaskSpec]) -> Result<Vec<String>, ConfigError> {
    let position: HashMap<&str, usize> = members
        .iter()
        .enumerate()
        .map(|(pos, spec)| (spec.id.as_str(), pos))
        .collect();

    let mut in_degree = vec![0usize; members.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); members.len()];
    for (pos, spec) in members.iter().enumerate() {
        for dep in &spec.dependencies {
            if let Some(&dep_pos) = position.get(dep.as_str()) {
                in_degree[pos] += 1;
                dependents[dep_pos].push(pos);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..members.len()).filter(|&p| in_degree[p] == 0).collect();
    let mut order = Vec::with_capacity(members.len());
    let mut done = vec![false; members.len()];

    while let Some(pos) = ready.pop_first() {
        done[pos] = true;
        order.push(members[pos].id.clone());
        for &next in &dependents[pos] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() < members.len() {
        let blocked: BTreeMap<String, Vec<String>> = members
            .iter()
            .enumerate()
            .filter(|(pos, _)| !done[*pos])
            .map(|(_, spec)| {
                let unmet = spec
                    .dependencies
                    .iter()
                    .filter(|dep| position.get(dep.as_str()).is_some_and(|&p| !done[p]))
                    .cloned()
                    .collect();
                (spec.id.clone(), unmet)
            })
            .collect();
        return Err(CycleOrMissingDependencyError::new(blocked).into());
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn builder(specs: Vec<TaskSpec>) -> GraphBuilder {
        GraphBuilder::new(Arc::new(TaskCatalog::new(specs).unwrap()))
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_linear_chain() {
        let b = builder(vec![
            TaskSpec::new("gate", "x").with_dependency("compact"),
            TaskSpec::new("discover", "x"),
            TaskSpec::new("compact", "x").with_dependency("discover"),
        ]);
        let graph = b.build_all().unwrap();
        assert_eq!(graph.order(), ids(&["discover", "compact", "gate"]).as_slice());
    }

    #[test]
    fn test_every_task_after_its_dependencies() {
        let b = builder(vec![
            TaskSpec::new("report", "x").with_dependencies(["mine", "summary"]),
            TaskSpec::new("summary", "x").with_dependencies(["channels", "mine"]),
            TaskSpec::new("mine", "x").with_dependency("compact"),
            TaskSpec::new("channels", "x").with_dependency("compact"),
            TaskSpec::new("compact", "x").with_dependency("discover"),
            TaskSpec::new("discover", "x"),
        ]);
        let graph = b.build_all().unwrap();
        let order = graph.order();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();

        assert_eq!(order.len(), 6);
        for spec in b.catalog().iter() {
            for dep in &spec.dependencies {
                assert!(pos(dep) < pos(&spec.id), "{dep} must precede {}", spec.id);
            }
        }
    }

    #[test]
    fn test_ties_follow_catalog_order() {
        let b = builder(vec![
            TaskSpec::new("c", "x"),
            TaskSpec::new("a", "x"),
            TaskSpec::new("b", "x"),
        ]);
        assert_eq!(b.build_all().unwrap().order(), ids(&["c", "a", "b"]).as_slice());
    }

    #[test]
    fn test_ties_follow_allow_list_order() {
        let b = builder(vec![
            TaskSpec::new("a", "x"),
            TaskSpec::new("b", "x"),
            TaskSpec::new("c", "x"),
        ]);
        let allow = ids(&["c", "b"]);
        assert_eq!(b.build(Some(&allow)).unwrap().order(), allow.as_slice());
    }

    #[test]
    fn test_dependencies_outside_allow_list_are_satisfied() {
        let b = builder(vec![
            TaskSpec::new("positioning", "x"),
            TaskSpec::new("review", "x").with_dependency("positioning"),
            TaskSpec::new("revise", "x").with_dependencies(["positioning", "review"]),
            TaskSpec::new("recheck", "x").with_dependencies(["revise", "review"]),
        ]);
        let allow = ids(&["recheck", "revise"]);
        let graph = b.build(Some(&allow)).unwrap();

        assert_eq!(graph.order(), ids(&["revise", "recheck"]).as_slice());
        assert_eq!(graph.len(), 2);
        assert!(!graph.contains("review"));
    }

    #[test]
    fn test_two_node_cycle_reports_both() {
        let b = builder(vec![
            TaskSpec::new("a", "x").with_dependency("b"),
            TaskSpec::new("b", "x").with_dependency("a"),
        ]);
        let err = b.build_all().unwrap_err();

        match err {
            ConfigError::CycleOrMissingDependency(e) => {
                assert_eq!(e.blocked.get("a").unwrap(), &ids(&["b"]));
                assert_eq!(e.blocked.get("b").unwrap(), &ids(&["a"]));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_reports_downstream_blocked_tasks() {
        let b = builder(vec![
            TaskSpec::new("root", "x"),
            TaskSpec::new("a", "x").with_dependencies(["root", "b"]),
            TaskSpec::new("b", "x").with_dependency("a"),
            TaskSpec::new("tail", "x").with_dependency("b"),
        ]);
        let err = b.build_all().unwrap_err();

        let ConfigError::CycleOrMissingDependency(e) = err else {
            panic!("expected cycle error");
        };
        assert_eq!(e.blocked_tasks(), vec!["a", "b", "tail"]);
        assert_eq!(e.blocked.get("a").unwrap(), &ids(&["b"]));
    }

    #[test]
    fn test_cycle_outside_allow_list_is_ignored() {
        let b = builder(vec![
            TaskSpec::new("a", "x").with_dependency("b"),
            TaskSpec::new("b", "x").with_dependency("a"),
            TaskSpec::new("c", "x").with_dependency("a"),
        ]);
        let allow = ids(&["c"]);
        assert_eq!(b.build(Some(&allow)).unwrap().order(), allow.as_slice());
    }

    #[test]
    fn test_unknown_allow_listed_task() {
        let b = builder(vec![TaskSpec::new("a", "x")]);
        let allow = ids(&["a", "missing"]);
        let err = b.build(Some(&allow)).unwrap_err();
        assert_eq!(err, ConfigError::UnknownTask { task: "missing".to_string() });
    }

    #[test]
    fn test_duplicate_allow_list_entries_run_once() {
        let b = builder(vec![TaskSpec::new("a", "x")]);
        let allow = ids(&["a", "a"]);
        assert_eq!(b.build(Some(&allow)).unwrap().order(), ids(&["a"]).as_slice());
    }

    #[test]
    fn test_empty_allow_list() {
        let b = builder(vec![TaskSpec::new("a", "x")]);
        let graph = b.build(Some(&[])).unwrap();
        assert!(graph.is_empty());
    }
}
