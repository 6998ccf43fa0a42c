//! Mock collaborators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::controller::{Precheck, PrecheckOutcome};
use crate::core::{RunInputs, TaskResult};
use crate::errors::ExecutorError;
use crate::executors::TaskExecutor;
use crate::progress::{ProgressEvent, ProgressSubscriber};
use crate::stage::TaskContext;
use crate::utils::now_utc;

/// An executor returning scripted outputs and recording every call.
///
/// Tasks without a scripted output return `"<task_id> output"`.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    outputs: HashMap<String, String>,
    failures: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
    contexts: Mutex<HashMap<String, TaskContext>>,
}

impl ScriptedExecutor {
    /// Creates an executor with no scripted outputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the output of one task.
    #[must_use]
    pub fn with_output(mut self, task_id: impl Into<String>, output: impl Into<String>) -> Self {
        self.outputs.insert(task_id.into(), output.into());
        self
    }

    /// Makes one task fail with `message`.
    #[must_use]
    pub fn with_failure(mut self, task_id: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(task_id.into(), message.into());
        self
    }

    /// Returns executed task ids in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Returns how many times a task was executed.
    #[must_use]
    pub fn call_count(&self, task_id: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == task_id).count()
    }

    /// Returns the context of the most recent call for a task.
    #[must_use]
    pub fn context_for(&self, task_id: &str) -> Option<TaskContext> {
        self.contexts.lock().get(task_id).cloned()
    }

    /// Resets call tracking.
    pub fn reset(&self) {
        self.calls.lock().clear();
        self.contexts.lock().clear();
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, task_id: &str, ctx: &TaskContext) -> Result<TaskResult, ExecutorError> {
        self.calls.lock().push(task_id.to_string());
        self.contexts.lock().insert(task_id.to_string(), ctx.clone());

        if let Some(message) = self.failures.get(task_id) {
            return Err(ExecutorError::new(task_id, message.clone()));
        }
        let output = self
            .outputs
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| format!("{task_id} output"));
        Ok(TaskResult::new(task_id, output))
    }
}

/// An executor that always fails.
#[derive(Debug)]
pub struct FailingExecutor {
    message: String,
}

impl FailingExecutor {
    /// Creates a failing executor.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl TaskExecutor for FailingExecutor {
    async fn execute(&self, task_id: &str, _ctx: &TaskContext) -> Result<TaskResult, ExecutorError> {
        Err(ExecutorError::new(task_id, self.message.clone()))
    }
}

/// A subscriber that records every progress update.
#[derive(Debug, Default)]
pub struct RecordingSubscriber {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSubscriber {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every recorded update.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Returns the percents forwarded for one run, in order.
    #[must_use]
    pub fn percents(&self, run_id: &str) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.run_id == run_id)
            .map(|e| e.percent)
            .collect()
    }

    /// Returns the last update for one run.
    #[must_use]
    pub fn last(&self, run_id: &str) -> Option<ProgressEvent> {
        self.events.lock().iter().rev().find(|e| e.run_id == run_id).cloned()
    }
}

impl ProgressSubscriber for RecordingSubscriber {
    fn on_progress(&self, run_id: &str, percent: u8, label: &str) {
        self.events.lock().push(ProgressEvent {
            run_id: run_id.to_string(),
            percent,
            label: label.to_string(),
            timestamp: now_utc(),
        });
    }
}

/// A precheck with a fixed outcome.
#[derive(Debug, Clone)]
pub struct StaticPrecheck {
    outcome: PrecheckOutcome,
}

impl StaticPrecheck {
    /// Accepts every input.
    #[must_use]
    pub fn accept() -> Self {
        Self {
            outcome: PrecheckOutcome::Accept,
        }
    }

    /// Rejects every input with `reasons`.
    #[must_use]
    pub fn reject(reasons: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            outcome: PrecheckOutcome::Reject(reasons.into_iter().map(Into::into).collect()),
        }
    }
}

impl Precheck for StaticPrecheck {
    fn check(&self, _inputs: &RunInputs) -> PrecheckOutcome {
        self.outcome.clone()
    }
}
