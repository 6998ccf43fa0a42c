//! Event sink system for observability.
//!
//! The stage executor and the controller describe every step of a run as a
//! [`PipelineEvent`] and hand it to an [`EventSink`]. Progress reporting,
//! logging and test assertions all consume the same stream.

mod event;
mod sink;

pub use event::PipelineEvent;
pub use sink::{CollectingEventSink, EventSink, FanoutEventSink, LoggingEventSink, NoOpEventSink};
