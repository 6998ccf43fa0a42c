//! Task results.

use crate::utils::{now_utc, preview};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The raw text a task produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// The producing task id.
    pub task_id: String,
    /// The task's output text.
    pub raw_output: String,
    /// When the output was produced.
    pub produced_at: DateTime<Utc>,
}

impl TaskResult {
    /// Creates a result stamped with the current time.
    #[must_use]
    pub fn new(task_id: impl Into<String>, raw_output: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            raw_output: raw_output.into(),
            produced_at: now_utc(),
        }
    }

    /// Returns the first `max_chars` characters of the output.
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        preview(&self.raw_output, max_chars)
    }

    /// Returns the output length in characters.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.raw_output.chars().count()
    }
}
