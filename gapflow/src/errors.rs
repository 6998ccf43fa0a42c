//! Error types for the gapflow pipeline.
//!
//! Errors are grouped by how the pipeline reacts to them:
//! configuration problems are fatal at construction, executor failures abort
//! the current stage, and persistence failures are logged while the run
//! continues in memory.

use crate::core::RunStage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Message recorded on runs that were still active when the process stopped.
pub const RESTART_INTERRUPTED_MESSAGE: &str =
    "process restarted before the run reached a terminal state";

/// The main error type for gapflow operations.
#[derive(Debug, Error)]
pub enum GapflowError {
    /// The task configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A task executor failed.
    #[error("{0}")]
    Executor(#[from] ExecutorError),

    /// A run record or artifact could not be persisted or loaded.
    #[error("{0}")]
    Persistence(#[from] PersistenceError),

    /// A task output was written twice within one execution context.
    #[error("{0}")]
    OutputConflict(#[from] OutputConflictError),

    /// A run attempted a stage transition the state machine does not allow.
    #[error("Invalid stage transition for run '{run_id}': {from} -> {to}")]
    InvalidTransition {
        /// The run being advanced.
        run_id: String,
        /// The current stage.
        from: RunStage,
        /// The requested stage.
        to: RunStage,
    },

    /// No record exists for the requested run.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Recorded on runs interrupted by a restart.
    #[error("{}", RESTART_INTERRUPTED_MESSAGE)]
    RestartInterrupted,

    /// The task driving a run panicked or was cancelled.
    #[error("Run worker for '{run_id}' stopped abnormally: {message}")]
    WorkerCrashed {
        /// The run being driven.
        run_id: String,
        /// The panic payload, when it was a string.
        message: String,
    },
}

/// Errors in the declarative task configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The dependency graph could not be fully resolved.
    #[error("{0}")]
    CycleOrMissingDependency(#[from] CycleOrMissingDependencyError),

    /// A stage or allow-list names a task that is not configured.
    #[error("Unknown task: '{task}'")]
    UnknownTask {
        /// The unknown task id.
        task: String,
    },

    /// A task depends on an id that is not configured.
    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency {
        /// The declaring task.
        task: String,
        /// The missing dependency.
        dependency: String,
    },

    /// A task references an executor that is not registered.
    #[error("Task '{task}' references unknown executor '{executor}'")]
    UnknownExecutor {
        /// The declaring task.
        task: String,
        /// The executor key.
        executor: String,
    },

    /// A task id was declared more than once.
    #[error("Task '{task}' is declared more than once")]
    DuplicateTask {
        /// The duplicated id.
        task: String,
    },

    /// A task lists itself as a dependency.
    #[error("Task '{task}' cannot depend on itself")]
    SelfDependency {
        /// The offending task.
        task: String,
    },

    /// Any other structural problem.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Returns a stable diagnostic code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::CycleOrMissingDependency(_) => "GRAPH-001-CYCLE",
            Self::UnknownTask { .. } => "GRAPH-002-UNKNOWN_TASK",
            Self::UnknownDependency { .. } => "GRAPH-003-MISSING_DEP",
            Self::UnknownExecutor { .. } => "GRAPH-004-UNKNOWN_EXECUTOR",
            Self::DuplicateTask { .. } => "GRAPH-005-DUPLICATE",
            Self::SelfDependency { .. } => "GRAPH-006-SELF_DEP",
            Self::Invalid(_) => "GRAPH-000-INVALID",
        }
    }

    /// Returns a hint for fixing the problem, when one is known.
    #[must_use]
    pub fn fix_hint(&self) -> Option<&'static str> {
        match self {
            Self::CycleOrMissingDependency(_) => Some(
                "Check that every dependency names a task in the same stage and that no two tasks depend on each other.",
            ),
            Self::UnknownDependency { .. } | Self::UnknownTask { .. } => {
                Some("Check for typos in task ids.")
            }
            Self::UnknownExecutor { .. } => {
                Some("Register the executor key before building the controller.")
            }
            _ => None,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Some(hint) = self.fix_hint() {
            map.insert("fix_hint".to_string(), serde_json::json!(hint));
        }
        if let Self::CycleOrMissingDependency(err) = self {
            map.insert("blocked".to_string(), serde_json::json!(err.blocked));
        }
        map
    }
}

/// Raised when no task becomes resolvable while tasks remain.
///
/// Names every blocked task together with the dependencies it is still
/// waiting on.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Cycle or missing dependency; blocked tasks: {}", format_blocked(.blocked))]
pub struct CycleOrMissingDependencyError {
    /// Blocked task id -> unmet dependency ids.
    pub blocked: BTreeMap<String, Vec<String>>,
}

impl CycleOrMissingDependencyError {
    /// Creates a new error from the blocked set.
    #[must_use]
    pub fn new(blocked: BTreeMap<String, Vec<String>>) -> Self {
        Self { blocked }
    }

    /// Returns the blocked task ids.
    #[must_use]
    pub fn blocked_tasks(&self) -> Vec<&str> {
        self.blocked.keys().map(String::as_str).collect()
    }
}

fn format_blocked(blocked: &BTreeMap<String, Vec<String>>) -> String {
    blocked
        .iter()
        .map(|(task, deps)| format!("{task} <- [{}]", deps.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A task's external execution failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Task '{task_id}' failed: {message}")]
pub struct ExecutorError {
    /// The task that failed.
    pub task_id: String,
    /// The failure message.
    pub message: String,
}

impl ExecutorError {
    /// Creates a new executor error.
    #[must_use]
    pub fn new(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            message: message.into(),
        }
    }
}

/// A storage backend failed to read or write.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Persistence error during {operation}: {message}")]
pub struct PersistenceError {
    /// What was being attempted (e.g. "put run-1").
    pub operation: String,
    /// The underlying failure.
    pub message: String,
}

impl PersistenceError {
    /// Creates a new persistence error.
    #[must_use]
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Wraps an IO error.
    #[must_use]
    pub fn io(operation: impl Into<String>, err: &std::io::Error) -> Self {
        Self::new(operation, err.to_string())
    }
}

/// Raised when writing an output that already exists in an execution context.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Output conflict: task '{task_id}' already has an output")]
pub struct OutputConflictError {
    /// The conflicting task id.
    pub task_id: String,
}

impl OutputConflictError {
    /// Creates a new output conflict error.
    #[must_use]
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_names_blocked_tasks() {
        let mut blocked = BTreeMap::new();
        blocked.insert("a".to_string(), vec!["b".to_string()]);
        blocked.insert("b".to_string(), vec!["a".to_string()]);
        let err = CycleOrMissingDependencyError::new(blocked);

        let msg = err.to_string();
        assert!(msg.contains("a <- [b]"));
        assert!(msg.contains("b <- [a]"));
        assert_eq!(err.blocked_tasks(), vec!["a", "b"]);
    }

    #[test]
    fn test_config_error_to_dict() {
        let err = ConfigError::UnknownExecutor {
            task: "gate".to_string(),
            executor: "llm".to_string(),
        };
        let dict = err.to_dict();

        assert_eq!(dict.get("code").unwrap(), "GRAPH-004-UNKNOWN_EXECUTOR");
        assert!(dict.contains_key("fix_hint"));
    }

    #[test]
    fn test_cycle_dict_includes_blocked() {
        let mut blocked = BTreeMap::new();
        blocked.insert("x".to_string(), vec!["y".to_string()]);
        let err = ConfigError::from(CycleOrMissingDependencyError::new(blocked));

        let dict = err.to_dict();
        assert_eq!(dict.get("blocked").unwrap(), &serde_json::json!({"x": ["y"]}));
    }

    #[test]
    fn test_executor_error_display() {
        let err = ExecutorError::new("discover", "rate limited");
        assert_eq!(err.to_string(), "Task 'discover' failed: rate limited");

        let wrapped: GapflowError = err.into();
        assert!(matches!(wrapped, GapflowError::Executor(_)));
    }

    #[test]
    fn test_restart_interrupted_message() {
        assert_eq!(
            GapflowError::RestartInterrupted.to_string(),
            RESTART_INTERRUPTED_MESSAGE
        );
    }
}
