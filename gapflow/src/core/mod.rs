//! Core domain model types for gapflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Run stages, the transition table and run status
//! - Gate verdicts and the verdict extractor seam
//! - Task results, run inputs and the persisted run record

mod inputs;
mod result;
mod run;
mod stage;
mod verdict;

pub use inputs::{RunInputs, RunOptions};
pub use result::TaskResult;
pub use run::PipelineRun;
pub use stage::{RunStage, RunStatus, StageKind};
pub use verdict::{MarkerVerdictExtractor, Verdict, VerdictExtractor};
