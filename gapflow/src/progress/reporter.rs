//! Monotonic progress reporting.

use super::ProgressWindows;
use crate::core::{RunStage, StageKind};
use crate::events::{EventSink, PipelineEvent};
use crate::utils::now_utc;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// One progress update as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Run id.
    pub run_id: String,
    /// Percent complete, 0-100.
    pub percent: u8,
    /// Human-readable description of the current step.
    pub label: String,
    /// When the update was produced.
    pub timestamp: DateTime<Utc>,
}

/// Receives progress updates.
///
/// Called while that run's progress lock is held, so updates for one run
/// arrive in non-decreasing order. Other runs are not blocked. Implementations
/// must not call back into the reporter for the same run.
pub trait ProgressSubscriber: Send + Sync {
    /// Handles one update.
    fn on_progress(&self, run_id: &str, percent: u8, label: &str);
}

/// Discards all updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgressSubscriber;

impl ProgressSubscriber for NoOpProgressSubscriber {
    fn on_progress(&self, _run_id: &str, _percent: u8, _label: &str) {}
}

/// Forwards updates into an unbounded channel, e.g. for a streaming endpoint.
#[derive(Debug, Clone)]
pub struct ChannelProgressSubscriber {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgressSubscriber {
    /// Creates a subscriber and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSubscriber for ChannelProgressSubscriber {
    fn on_progress(&self, run_id: &str, percent: u8, label: &str) {
        let event = ProgressEvent {
            run_id: run_id.to_string(),
            percent,
            label: label.to_string(),
            timestamp: now_utc(),
        };
        if self.tx.send(event).is_err() {
            debug!(run_id, "Progress receiver dropped");
        }
    }
}

/// Maps pipeline events to a per-run percentage that never decreases.
pub struct ProgressReporter {
    windows: ProgressWindows,
    maxima: DashMap<String, Arc<Mutex<u8>>>,
    subscriber: Arc<dyn ProgressSubscriber>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("windows", &self.windows)
            .field("tracked_runs", &self.maxima.len())
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    /// Creates a reporter.
    #[must_use]
    pub fn new(windows: ProgressWindows, subscriber: Arc<dyn ProgressSubscriber>) -> Self {
        Self {
            windows,
            maxima: DashMap::new(),
            subscriber,
        }
    }

    /// Returns the stage windows.
    #[must_use]
    pub fn windows(&self) -> &ProgressWindows {
        &self.windows
    }

    /// Computes the percent for task `idx` of `count` in `stage`.
    #[must_use]
    pub fn percent(&self, stage: StageKind, idx: usize, count: usize) -> u8 {
        self.windows.get(stage).percent(idx, count)
    }

    /// Reports a candidate value, forwarding `max(candidate, highest so far)`.
    ///
    /// Returns the value forwarded.
    pub fn report(&self, run_id: &str, candidate: u8, label: &str) -> u8 {
        let candidate = candidate.min(100);
        // Clone the slot out so the map shard is released before the subscriber runs.
        let slot = Arc::clone(
            self.maxima
                .entry(run_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(0)))
                .value(),
        );
        let mut highest = slot.lock();
        let value = (*highest).max(candidate);
        *highest = value;
        self.subscriber.on_progress(run_id, value, label);
        value
    }

    /// Returns the highest value reported for a run.
    #[must_use]
    pub fn current(&self, run_id: &str) -> Option<u8> {
        let slot = self.maxima.get(run_id).map(|v| Arc::clone(v.value()))?;
        let value = *slot.lock();
        Some(value)
    }

    /// Drops the tracked value for a purged run.
    pub fn forget(&self, run_id: &str) {
        self.maxima.remove(run_id);
    }

    fn handle(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted { run_id } => {
                self.report(run_id, 0, "queued");
            }
            PipelineEvent::StageStarted { run_id, stage, .. } => {
                let low = self.windows.get(*stage).low;
                self.report(run_id, low, &format!("{stage} started"));
            }
            PipelineEvent::TaskStarted {
                run_id,
                stage,
                task_id,
                index,
                total,
            } => {
                let value = self.percent(*stage, *index, *total);
                self.report(run_id, value, &format!("{task_id} started ({}/{total})", index + 1));
            }
            PipelineEvent::TaskCompleted {
                run_id,
                stage,
                task_id,
                index,
                total,
                ..
            } => {
                let value = self.percent(*stage, index + 1, *total);
                self.report(run_id, value, &format!("{task_id} completed ({}/{total})", index + 1));
            }
            PipelineEvent::StageCompleted { run_id, stage, .. } => {
                let high = self.windows.get(*stage).high;
                self.report(run_id, high, &format!("{stage} completed"));
            }
            PipelineEvent::VerdictExtracted { run_id, verdict, .. } => {
                self.report(run_id, 0, &format!("verdict {verdict}"));
            }
            PipelineEvent::RunFinished { run_id, stage } => match stage {
                RunStage::Completed => {
                    self.report(run_id, 100, "completed");
                }
                RunStage::Rejected => {
                    self.report(run_id, 100, "rejected");
                }
                _ => {
                    self.report(run_id, 0, "failed");
                }
            },
            PipelineEvent::TaskFailed { .. } | PipelineEvent::StageFailed { .. } => {}
        }
    }
}

impl EventSink for ProgressReporter {
    fn try_emit(&self, event: &PipelineEvent) {
        self.handle(event);
    }
}
