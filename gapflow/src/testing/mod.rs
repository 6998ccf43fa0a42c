//! Testing utilities for gapflow pipelines.
//!
//! This module provides:
//! - Scripted and failing task executors
//! - A progress subscriber that records every update
//! - A precheck with a fixed outcome

mod mocks;

pub use mocks::{FailingExecutor, RecordingSubscriber, ScriptedExecutor, StaticPrecheck};
