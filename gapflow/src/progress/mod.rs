//! Progress reporting.
//!
//! Each stage owns a slice of 0-100. [`ProgressReporter`] turns task and
//! stage events into a percentage inside that slice and forwards the running
//! maximum to a [`ProgressSubscriber`]. An optional [`ArtifactPoller`] feeds
//! the same reporter from artifact counts between task boundaries.

mod poller;
mod reporter;
mod window;

pub use poller::{ArtifactPoller, ArtifactProbe, PollerHandle, StoreProbe};
pub use reporter::{
    ChannelProgressSubscriber, NoOpProgressSubscriber, ProgressEvent, ProgressReporter, ProgressSubscriber,
};
pub use window::{ProgressWindows, StageWindow};
