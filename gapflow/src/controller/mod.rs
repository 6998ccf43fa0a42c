//! Run orchestration.
//!
//! [`PipelineController`] owns the run state machine:
//!
//! ```text
//! PENDING_GATE_CHECK -> DISCOVERY_RUNNING -> GATE_EVALUATED
//!     -> REPORT_ONLY | REVISION_RUNNING -> REPORT_RUNNING -> COMPLETED
//! ```
//!
//! Any non-terminal stage may fail; a pending run may be rejected by its
//! [`Precheck`]. Every stage change is written through to the
//! [`JobStore`](crate::store::JobStore), and every task output is saved to
//! the [`ArtifactStore`].

mod artifacts;
mod builder;
mod precheck;
mod runner;

pub use artifacts::{ArtifactStore, FileArtifactStore, InMemoryArtifactStore, StoredArtifact, PRECHECK_STAGE};
pub use builder::ControllerBuilder;
pub use precheck::{AcceptAll, Precheck, PrecheckOutcome, RequiredFieldsPrecheck, DEFAULT_REQUIRED_FIELDS};
pub use runner::{next_stage_after_gate, PipelineController, StagePlan, GATE_VERDICT_KEY, REJECTION_ARTIFACT};
