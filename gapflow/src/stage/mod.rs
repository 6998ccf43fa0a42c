//! Stage execution.
//!
//! A stage is one resolved [`TaskGraph`](crate::graph::TaskGraph) run
//! sequentially against a write-once [`ExecutionContext`].

mod context;
mod executor;

pub use context::{ExecutionContext, TaskContext};
pub use executor::{StageExecutor, StageFailure, DEFAULT_CONTEXT_WARN_CHARS, PREVIEW_CHARS};
