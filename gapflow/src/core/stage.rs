//! Run stages, run status and the stage transition table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution stage a task list belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Research tasks plus the gate task.
    Discovery,
    /// Optional revision pass triggered by the gate verdict.
    Revision,
    /// Final synthesis.
    Report,
}

impl StageKind {
    /// All stages in execution order.
    pub const ALL: [Self; 3] = [Self::Discovery, Self::Revision, Self::Report];

    /// Returns the lowercase stage name used for timings and artifact folders.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Revision => "revision",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state-machine position of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStage {
    /// Created; input precheck not yet passed.
    PendingGateCheck,
    /// Discovery tasks are executing.
    DiscoveryRunning,
    /// The gate verdict has been extracted.
    GateEvaluated,
    /// Revision skipped; report comes next.
    ReportOnly,
    /// Revision tasks are executing.
    RevisionRunning,
    /// The report task is executing.
    ReportRunning,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
    /// Terminal: input precheck rejected the run.
    Rejected,
}

impl Default for RunStage {
    fn default() -> Self {
        Self::PendingGateCheck
    }
}

impl RunStage {
    /// Returns true for COMPLETED, FAILED and REJECTED.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }

    /// Returns true if the state machine allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        matches!(
            (self, next),
            (Self::PendingGateCheck, Self::DiscoveryRunning | Self::Rejected)
                | (Self::DiscoveryRunning, Self::GateEvaluated)
                | (Self::GateEvaluated, Self::ReportOnly | Self::RevisionRunning)
                | (Self::ReportOnly | Self::RevisionRunning, Self::ReportRunning)
                | (Self::ReportRunning, Self::Completed)
        )
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PendingGateCheck => "PENDING_GATE_CHECK",
            Self::DiscoveryRunning => "DISCOVERY_RUNNING",
            Self::GateEvaluated => "GATE_EVALUATED",
            Self::ReportOnly => "REPORT_ONLY",
            Self::RevisionRunning => "REVISION_RUNNING",
            Self::ReportRunning => "REPORT_RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

/// Coarse run status derived from the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted but not yet executing.
    Pending,
    /// A stage is executing or about to.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Rejected by the input precheck.
    Rejected,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl RunStatus {
    /// Maps a stage to its status.
    #[must_use]
    pub fn from_stage(stage: RunStage) -> Self {
        match stage {
            RunStage::PendingGateCheck => Self::Pending,
            RunStage::Completed => Self::Completed,
            RunStage::Failed => Self::Failed,
            RunStage::Rejected => Self::Rejected,
            _ => Self::Running,
        }
    }

    /// Returns true if the status is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            RunStage::PendingGateCheck,
            RunStage::DiscoveryRunning,
            RunStage::GateEvaluated,
            RunStage::RevisionRunning,
            RunStage::ReportRunning,
            RunStage::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(RunStage::GateEvaluated.can_transition_to(RunStage::ReportOnly));
        assert!(RunStage::ReportOnly.can_transition_to(RunStage::ReportRunning));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal() {
        for stage in [
            RunStage::PendingGateCheck,
            RunStage::DiscoveryRunning,
            RunStage::GateEvaluated,
            RunStage::ReportOnly,
            RunStage::RevisionRunning,
            RunStage::ReportRunning,
        ] {
            assert!(stage.can_transition_to(RunStage::Failed));
        }
    }

    #[test]
    fn test_terminal_stages_are_final() {
        for stage in [RunStage::Completed, RunStage::Failed, RunStage::Rejected] {
            assert!(stage.is_terminal());
            assert!(!stage.can_transition_to(RunStage::Failed));
            assert!(!stage.can_transition_to(RunStage::DiscoveryRunning));
        }
    }

    #[test]
    fn test_rejected_only_from_pending() {
        assert!(RunStage::PendingGateCheck.can_transition_to(RunStage::Rejected));
        assert!(!RunStage::DiscoveryRunning.can_transition_to(RunStage::Rejected));
        assert!(!RunStage::GateEvaluated.can_transition_to(RunStage::Rejected));
    }

    #[test]
    fn test_no_skipping_stages() {
        assert!(!RunStage::PendingGateCheck.can_transition_to(RunStage::ReportRunning));
        assert!(!RunStage::DiscoveryRunning.can_transition_to(RunStage::RevisionRunning));
        assert!(!RunStage::GateEvaluated.can_transition_to(RunStage::Completed));
    }

    #[test]
    fn test_stage_serde_names() {
        let json = serde_json::to_string(&RunStage::DiscoveryRunning).unwrap();
        assert_eq!(json, "\"DISCOVERY_RUNNING\"");
        assert_eq!(RunStage::ReportOnly.to_string(), "REPORT_ONLY");
    }

    #[test]
    fn test_status_from_stage() {
        assert_eq!(RunStatus::from_stage(RunStage::PendingGateCheck), RunStatus::Pending);
        assert_eq!(RunStatus::from_stage(RunStage::GateEvaluated), RunStatus::Running);
        assert_eq!(RunStatus::from_stage(RunStage::Rejected), RunStatus::Rejected);
        assert!(RunStatus::Failed.is_terminal());
    }
}
