//! # Gapflow
//!
//! Orchestration core for gated, multi-stage task pipelines.
//!
//! A run moves through three stages of dependent tasks:
//!
//! - **Discovery**: every task that is neither a revision nor the report task
//! - **Revision**: an optional pass chosen by the gate verdict read from a
//!   discovery task's output
//! - **Report**: a single task that sees everything produced before it
//!
//! Tasks are executed by injected [`TaskExecutor`](executors::TaskExecutor)s
//! selected by key, so the crate itself never talks to a model or a network.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gapflow::prelude::*;
//!
//! let config = PipelineConfig::builtin()?;
//! let registry = ExecutorRegistry::new()
//!     .with("research", research)
//!     .with("synthesis", synthesis)
//!     .with("review", review)
//!     .with("report", report);
//!
//! let controller = ControllerBuilder::new(config, registry).build()?;
//! let run_id = controller.submit(inputs, RunOptions::default()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod controller;
pub mod core;
pub mod errors;
pub mod events;
pub mod executors;
pub mod graph;
pub mod observability;
pub mod progress;
pub mod stage;
pub mod store;
pub mod testing;
pub mod utils;


/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{load_default, load_from_path, PipelineConfig};
    pub use crate::controller::{
        ArtifactStore, ControllerBuilder, FileArtifactStore, InMemoryArtifactStore, PipelineController,
        Precheck, PrecheckOutcome, RequiredFieldsPrecheck,
    };
    pub use crate::core::{
        MarkerVerdictExtractor, PipelineRun, RunInputs, RunOptions, RunStage, RunStatus, StageKind,
        TaskResult, Verdict, VerdictExtractor,
    };
    pub use crate::errors::{ConfigError, ExecutorError, GapflowError, PersistenceError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::executors::{AsyncFnExecutor, ExecutorRegistry, FnExecutor, TaskExecutor};
    pub use crate::graph::{GraphBuilder, TaskCatalog, TaskGraph, TaskSpec};
    pub use crate::progress::{ProgressReporter, ProgressSubscriber, ProgressWindows};
    pub use crate::stage::{ExecutionContext, StageExecutor, TaskContext};
    pub use crate::store::{FileJobBackend, InMemoryJobBackend, JobBackend, JobStore};
}
