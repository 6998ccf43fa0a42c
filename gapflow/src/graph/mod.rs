//! Task declarations and dependency resolution.
//!
//! A [`TaskCatalog`] holds every configured [`TaskSpec`] for the life of the
//! process. [`GraphBuilder`] turns a subset of it into a [`TaskGraph`] whose
//! order places each task after all of its in-subset dependencies.

mod builder;
mod spec;

pub use builder::GraphBuilder;
pub use spec::{TaskCatalog, TaskSpec};

use std::collections::HashMap;

/// A resolved, acyclic task subset with its execution order.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: HashMap<String, TaskSpec>,
    order: Vec<String>,
}

impl TaskGraph {
    pub(crate) fn new(tasks: HashMap<String, TaskSpec>, order: Vec<String>) -> Self {
        Self { tasks, order }
    }

    /// Returns the execution order.
    #[must_use]
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Gets a task spec.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.get(id)
    }

    /// Returns true if the task participates in this graph.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Iterates specs in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskSpec> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
