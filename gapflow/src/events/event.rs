//! Typed pipeline events.

use crate::core::{RunStage, StageKind, Verdict};
use serde::{Deserialize, Serialize};

/// An observable step in a pipeline run.
///
/// Serialized with a `type` tag matching [`PipelineEvent::event_type`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A run was accepted and is about to start.
    #[serde(rename = "run.started")]
    RunStarted {
        /// Run id.
        run_id: String,
    },
    /// A stage began.
    #[serde(rename = "stage.started")]
    StageStarted {
        /// Run id.
        run_id: String,
        /// The stage.
        stage: StageKind,
        /// Number of tasks in the stage.
        total: usize,
    },
    /// A task began.
    #[serde(rename = "task.started")]
    TaskStarted {
        /// Run id.
        run_id: String,
        /// The stage.
        stage: StageKind,
        /// Task id.
        task_id: String,
        /// Zero-based position in the stage order.
        index: usize,
        /// Number of tasks in the stage.
        total: usize,
    },
    /// A task produced its output.
    #[serde(rename = "task.completed")]
    TaskCompleted {
        /// Run id.
        run_id: String,
        /// The stage.
        stage: StageKind,
        /// Task id.
        task_id: String,
        /// Zero-based position in the stage order.
        index: usize,
        /// Number of tasks in the stage.
        total: usize,
        /// Leading characters of the output.
        preview: String,
    },
    /// A task's executor failed.
    #[serde(rename = "task.failed")]
    TaskFailed {
        /// Run id.
        run_id: String,
        /// The stage.
        stage: StageKind,
        /// Task id.
        task_id: String,
        /// Zero-based position in the stage order.
        index: usize,
        /// Number of tasks in the stage.
        total: usize,
        /// Error message.
        error: String,
    },
    /// Every task of a stage completed.
    #[serde(rename = "stage.completed")]
    StageCompleted {
        /// Run id.
        run_id: String,
        /// The stage.
        stage: StageKind,
        /// Wall-clock duration in milliseconds.
        duration_ms: f64,
    },
    /// A stage aborted.
    #[serde(rename = "stage.failed")]
    StageFailed {
        /// Run id.
        run_id: String,
        /// The stage.
        stage: StageKind,
        /// Error message.
        error: String,
    },
    /// A verdict was extracted from gate output.
    #[serde(rename = "run.verdict")]
    VerdictExtracted {
        /// Run id.
        run_id: String,
        /// The task the verdict was read from.
        source_task: String,
        /// The extracted (or retained) verdict.
        verdict: Verdict,
    },
    /// A run reached a terminal stage.
    #[serde(rename = "run.finished")]
    RunFinished {
        /// Run id.
        run_id: String,
        /// COMPLETED, FAILED or REJECTED.
        stage: RunStage,
    },
}

impl PipelineEvent {
    /// Returns the dotted event type, e.g. `task.completed`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::StageStarted { .. } => "stage.started",
            Self::TaskStarted { .. } => "task.started",
            Self::TaskCompleted { .. } => "task.completed",
            Self::TaskFailed { .. } => "task.failed",
            Self::StageCompleted { .. } => "stage.completed",
            Self::StageFailed { .. } => "stage.failed",
            Self::VerdictExtracted { .. } => "run.verdict",
            Self::RunFinished { .. } => "run.finished",
        }
    }

    /// Returns the run the event belongs to.
    #[must_use]
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id }
            | Self::StageStarted { run_id, .. }
            | Self::TaskStarted { run_id, .. }
            | Self::TaskCompleted { run_id, .. }
            | Self::TaskFailed { run_id, .. }
            | Self::StageCompleted { run_id, .. }
            | Self::StageFailed { run_id, .. }
            | Self::VerdictExtracted { run_id, .. }
            | Self::RunFinished { run_id, .. } => run_id,
        }
    }

    /// Returns the task id for task-level events.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    /// Serializes the event to JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
