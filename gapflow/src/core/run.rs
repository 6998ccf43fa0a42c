//! The persisted pipeline run record.

use super::{RunOptions, RunStage, RunStatus, Verdict};
use crate::errors::GapflowError;
use crate::utils::now_utc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One pipeline run, persisted by the job store after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run id.
    pub run_id: String,
    /// Current state-machine stage.
    pub stage: RunStage,
    /// Coarse status derived from `stage`.
    pub status: RunStatus,
    /// Latest gate verdict.
    #[serde(default)]
    pub verdict: Verdict,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Wall-clock seconds per stage name.
    #[serde(default)]
    pub stage_times: BTreeMap<String, f64>,
    /// Seconds from start to terminal stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_elapsed_secs: Option<f64>,
    /// The triggering error for FAILED runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Reasons for REJECTED runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejection_reasons: Vec<String>,
    /// Failure of the best-effort revision pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_error: Option<String>,
    /// Whether the revision pass was executed.
    #[serde(default)]
    pub revised: bool,
    /// Options the run was submitted with.
    #[serde(default)]
    pub options: RunOptions,
}

impl PipelineRun {
    /// Creates a new record in `PENDING_GATE_CHECK`.
    #[must_use]
    pub fn new(run_id: impl Into<String>, options: RunOptions) -> Self {
        let now = now_utc();
        Self {
            run_id: run_id.into(),
            stage: RunStage::PendingGateCheck,
            status: RunStatus::Pending,
            verdict: Verdict::Unknown,
            created_at: now,
            updated_at: now,
            stage_times: BTreeMap::new(),
            total_elapsed_secs: None,
            error: None,
            rejection_reasons: Vec::new(),
            revision_error: None,
            revised: false,
            options,
        }
    }

    /// Returns true if the run reached COMPLETED, FAILED or REJECTED.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Moves to `next`, rejecting transitions the state machine does not allow.
    ///
    /// # Errors
    ///
    /// Returns `GapflowError::InvalidTransition` for illegal moves.
    pub fn transition(&mut self, next: RunStage) -> Result<(), GapflowError> {
        if !self.stage.can_transition_to(next) {
            return Err(GapflowError::InvalidTransition {
                run_id: self.run_id.clone(),
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        self.status = RunStatus::from_stage(next);
        self.touch();
        Ok(())
    }

    /// Marks the run FAILED with the triggering message.
    ///
    /// # Errors
    ///
    /// Returns `GapflowError::InvalidTransition` if the run is already terminal.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), GapflowError> {
        self.transition(RunStage::Failed)?;
        self.error = Some(message.into());
        Ok(())
    }

    /// Marks the run REJECTED with structured reasons.
    ///
    /// # Errors
    ///
    /// Returns `GapflowError::InvalidTransition` unless the run is pending.
    pub fn reject(&mut self, reasons: Vec<String>) -> Result<(), GapflowError> {
        self.transition(RunStage::Rejected)?;
        self.rejection_reasons = reasons;
        Ok(())
    }

    /// Records a stage duration in seconds.
    pub fn record_stage_time(&mut self, stage: &str, secs: f64) {
        self.stage_times.insert(stage.to_string(), secs);
        self.touch();
    }

    /// Refreshes `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = now_utc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_is_pending() {
        let run = PipelineRun::new("r1", RunOptions::default());
        assert_eq!(run.stage, RunStage::PendingGateCheck);
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.verdict, Verdict::Unknown);
        assert!(!run.is_terminal());
    }

    #[test]
    fn test_transition_updates_status() {
        let mut run = PipelineRun::new("r1", RunOptions::default());
        run.transition(RunStage::DiscoveryRunning).unwrap();
        assert_eq!(run.status, RunStatus::Running);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut run = PipelineRun::new("r1", RunOptions::default());
        let err = run.transition(RunStage::ReportRunning).unwrap_err();

        assert!(matches!(
            err,
            GapflowError::InvalidTransition {
                from: RunStage::PendingGateCheck,
                to: RunStage::ReportRunning,
                ..
            }
        ));
        assert_eq!(run.stage, RunStage::PendingGateCheck);
    }

    #[test]
    fn test_fail_records_message() {
        let mut run = PipelineRun::new("r1", RunOptions::default());
        run.transition(RunStage::DiscoveryRunning).unwrap();
        run.fail("boom").unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("boom"));
        assert!(run.fail("again").is_err());
    }

    #[test]
    fn test_reject_only_when_pending() {
        let mut run = PipelineRun::new("r1", RunOptions::default());
        run.reject(vec!["missing idea".to_string()]).unwrap();
        assert_eq!(run.stage, RunStage::Rejected);
        assert_eq!(run.rejection_reasons.len(), 1);

        let mut running = PipelineRun::new("r2", RunOptions::default());
        running.transition(RunStage::DiscoveryRunning).unwrap();
        assert!(running.reject(vec![]).is_err());
    }

    #[test]
    fn test_record_serde_round_trip_keeps_stage() {
        let mut run = PipelineRun::new("r1", RunOptions::default().with_revise_on_no(true));
        run.transition(RunStage::DiscoveryRunning).unwrap();
        run.record_stage_time("discovery", 1.5);

        let json = serde_json::to_string(&run).unwrap();
        assert!(json.contains("\"DISCOVERY_RUNNING\""));
        let back: PipelineRun = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run);
    }
}
