//! Execution contexts passed between tasks.

use crate::core::{RunInputs, TaskResult};
use crate::errors::OutputConflictError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Write-once map of task outputs for one stage.
///
/// May be pre-seeded with outputs from earlier stages. Once an id has an
/// entry it can never be overwritten.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    results: BTreeMap<String, TaskResult>,
}

impl ExecutionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context seeded with raw outputs.
    ///
    /// # Errors
    ///
    /// Returns `OutputConflictError` if `seeds` repeats an id.
    pub fn seeded<I, K, V>(seeds: I) -> Result<Self, OutputConflictError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut ctx = Self::new();
        for (id, output) in seeds {
            ctx.seed(id, output)?;
        }
        Ok(ctx)
    }

    /// Records a task result.
    ///
    /// # Errors
    ///
    /// Returns `OutputConflictError` if the task already has an output.
    pub fn insert(&mut self, result: TaskResult) -> Result<(), OutputConflictError> {
        if self.results.contains_key(&result.task_id) {
            return Err(OutputConflictError::new(result.task_id));
        }
        self.results.insert(result.task_id.clone(), result);
        Ok(())
    }

    /// Records a raw output produced outside this stage.
    ///
    /// # Errors
    ///
    /// Returns `OutputConflictError` if the id already has an output.
    pub fn seed(&mut self, id: impl Into<String>, output: impl Into<String>) -> Result<(), OutputConflictError> {
        self.insert(TaskResult::new(id, output))
    }

    /// Gets a result.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TaskResult> {
        self.results.get(id)
    }

    /// Gets a raw output.
    #[must_use]
    pub fn output(&self, id: &str) -> Option<&str> {
        self.results.get(id).map(|r| r.raw_output.as_str())
    }

    /// Returns true if the id has an output.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.results.contains_key(id)
    }

    /// Iterates results in id order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.values()
    }

    /// Returns raw outputs keyed by task id.
    #[must_use]
    pub fn outputs(&self) -> BTreeMap<String, String> {
        self.results
            .iter()
            .map(|(id, r)| (id.clone(), r.raw_output.clone()))
            .collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// What one task sees: its declared dependency outputs plus the run inputs.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Run id.
    pub run_id: String,
    /// The task being executed.
    pub task_id: String,
    /// Outputs of the task's declared dependencies that are available.
    pub dependencies: BTreeMap<String, String>,
    /// Run-level inputs.
    pub inputs: Arc<RunInputs>,
}

impl TaskContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        task_id: impl Into<String>,
        dependencies: BTreeMap<String, String>,
        inputs: Arc<RunInputs>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            task_id: task_id.into(),
            dependencies,
            inputs,
        }
    }

    /// Gets a dependency output.
    #[must_use]
    pub fn dependency(&self, id: &str) -> Option<&str> {
        self.dependencies.get(id).map(String::as_str)
    }

    /// Gets a run input.
    #[must_use]
    pub fn input(&self, key: &str) -> Option<&str> {
        self.inputs.get(key)
    }

    /// Total characters across dependency outputs and inputs.
    #[must_use]
    pub fn total_chars(&self) -> usize {
        let deps: usize = self.dependencies.values().map(|v| v.chars().count()).sum();
        let inputs: usize = self.inputs.iter().map(|(_, v)| v.chars().count()).sum();
        deps + inputs
    }
}
