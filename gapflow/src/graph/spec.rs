//! Task specifications and the static task catalog.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Declarative specification of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique task id.
    pub id: String,
    /// Ids of tasks whose outputs this task consumes.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Key of the executor that runs this task.
    #[serde(rename = "executor")]
    pub executor_ref: String,
}

impl TaskSpec {
    /// Creates a task with no dependencies.
    #[must_use]
    pub fn new(id: impl Into<String>, executor_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dependencies: BTreeSet::new(),
            executor_ref: executor_ref.into(),
        }
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Validates the task specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is blank or the task depends on itself.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::Invalid("task id cannot be empty".to_string()));
        }
        if self.dependencies.contains(&self.id) {
            return Err(ConfigError::SelfDependency {
                task: self.id.clone(),
            });
        }
        Ok(())
    }
}

/// The immutable set of configured tasks, in declaration order.
///
/// Construction checks ids and dependency references but not cycles; cycles
/// are reported when a graph is built.
#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    specs: Vec<TaskSpec>,
    index: HashMap<String, usize>,
}

impl TaskCatalog {
    /// Builds a catalog from task specs.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for duplicate ids, self dependencies and
    /// dependencies on undeclared tasks.
    pub fn new(specs: impl IntoIterator<Item = TaskSpec>) -> Result<Self, ConfigError> {
        let specs: Vec<TaskSpec> = specs.into_iter().collect();
        let mut index = HashMap::with_capacity(specs.len());

        for (pos, spec) in specs.iter().enumerate() {
            spec.validate()?;
            if index.insert(spec.id.clone(), pos).is_some() {
                return Err(ConfigError::DuplicateTask {
                    task: spec.id.clone(),
                });
            }
        }

        for spec in &specs {
            if let Some(dep) = spec.dependencies.iter().find(|d| !index.contains_key(*d)) {
                return Err(ConfigError::UnknownDependency {
                    task: spec.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        Ok(Self { specs, index })
    }

    /// Gets a task by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TaskSpec> {
        self.index.get(id).map(|&pos| &self.specs[pos])
    }

    /// Returns true if the task is declared.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Iterates tasks in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskSpec> {
        self.specs.iter()
    }

    /// Returns task ids in declaration order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.id.clone()).collect()
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns true if no tasks are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_preserves_declaration_order() {
        let catalog = TaskCatalog::new(vec![
            TaskSpec::new("b", "x"),
            TaskSpec::new("a", "x").with_dependency("b"),
        ])
        .unwrap();

        assert_eq!(catalog.ids(), vec!["b", "a"]);
        assert!(catalog.get("a").unwrap().dependencies.contains("b"));
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let err = TaskCatalog::new(vec![TaskSpec::new("a", "x"), TaskSpec::new("a", "y")]).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateTask { task: "a".to_string() });
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = TaskCatalog::new(vec![TaskSpec::new("a", "x").with_dependency("ghost")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownDependency {
                task: "a".to_string(),
                dependency: "ghost".to_string(),
            }
        );
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = TaskCatalog::new(vec![TaskSpec::new("a", "x").with_dependency("a")]).unwrap_err();
        assert_eq!(err.code(), "GRAPH-006-SELF_DEP");
    }

    #[test]
    fn test_cycles_are_accepted_by_catalog() {
        let catalog = TaskCatalog::new(vec![
            TaskSpec::new("a", "x").with_dependency("b"),
            TaskSpec::new("b", "x").with_dependency("a"),
        ]);
        assert!(catalog.is_ok());
    }
}
