//! Best-effort progress polling from artifact counts.
//!
//! Long stages can go minutes between task boundaries. The poller samples an
//! artifact count on an interval and feeds a percent estimate into the same
//! reporter, which keeps the maximum. Every tick forwards a value, so
//! subscribers get a heartbeat even when nothing changed.

use super::ProgressReporter;
use crate::controller::ArtifactStore;
use crate::core::StageKind;
use crate::store::JobStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Source of externally produced artifact counts.
#[async_trait]
pub trait ArtifactProbe: Send + Sync {
    /// Returns how many artifacts exist for the run's stage.
    async fn count(&self, run_id: &str, stage: StageKind) -> usize;
}

/// Probes an [`ArtifactStore`].
#[derive(Debug, Clone)]
pub struct StoreProbe {
    store: Arc<dyn ArtifactStore>,
}

impl StoreProbe {
    /// Creates a probe over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ArtifactProbe for StoreProbe {
    async fn count(&self, run_id: &str, stage: StageKind) -> usize {
        self.store.count(run_id, stage.as_str()).await
    }
}

/// Starts interval pollers for individual stages.
#[derive(Clone)]
pub struct ArtifactPoller {
    reporter: Arc<ProgressReporter>,
    probe: Arc<dyn ArtifactProbe>,
    jobs: Arc<JobStore>,
    interval: Duration,
}

impl std::fmt::Debug for ArtifactPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactPoller")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Handle to a running poll loop.
#[derive(Debug)]
pub struct PollerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Signals the loop to stop and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            debug!(error = %e, "Progress poller task ended abnormally");
        }
    }

    /// Returns true once the loop has exited on its own.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl ArtifactPoller {
    /// Creates a poller.
    #[must_use]
    pub fn new(
        reporter: Arc<ProgressReporter>,
        probe: Arc<dyn ArtifactProbe>,
        jobs: Arc<JobStore>,
        interval: Duration,
    ) -> Self {
        Self {
            reporter,
            probe,
            jobs,
            interval,
        }
    }

    /// Polls `stage` of `run_id` until stopped or the run is terminal.
    ///
    /// `expected` is the artifact count at which the stage window is full.
    #[must_use]
    pub fn start(&self, run_id: &str, stage: StageKind, expected: usize) -> PollerHandle {
        let (stop, mut stopped) = watch::channel(false);
        let this = self.clone();
        let run_id = run_id.to_string();

        let task = tokio::spawn(async move {
            let window = this.reporter.windows().get(stage);
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stopped.changed() => break,
                }
                if *stopped.borrow() {
                    break;
                }
                match this.jobs.is_terminal(&run_id).await {
                    Ok(Some(false)) => {}
                    Ok(_) => break,
                    Err(e) => debug!(run_id = %run_id, error = %e, "Poller could not read run status"),
                }

                let count = this.probe.count(&run_id, stage).await;
                let candidate = window.percent(count.min(expected), expected);
                this.reporter.report(
                    &run_id,
                    candidate,
                    &format!("{stage} in progress ({count}/{expected} artifacts)"),
                );
            }
            debug!(run_id = %run_id, stage = %stage, "Progress poller stopped");
        });

        PollerHandle { stop, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::InMemoryArtifactStore;
    use crate::core::{PipelineRun, RunOptions, RunStage};
    use crate::progress::ProgressWindows;
    use crate::testing::RecordingSubscriber;

    async fn setup() -> (ArtifactPoller, Arc<InMemoryArtifactStore>, Arc<JobStore>, Arc<RecordingSubscriber>) {
        let sub = Arc::new(RecordingSubscriber::new());
        let reporter = Arc::new(ProgressReporter::new(ProgressWindows::default(), sub.clone()));
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let jobs = Arc::new(JobStore::in_memory());
        let mut run = PipelineRun::new("r", RunOptions::default());
        run.transition(RunStage::DiscoveryRunning).unwrap();
        jobs.put(&run).await.unwrap();

        let poller = ArtifactPoller::new(
            reporter,
            Arc::new(StoreProbe::new(artifacts.clone())),
            jobs.clone(),
            Duration::from_millis(10),
        );
        (poller, artifacts, jobs, sub)
    }

    #[tokio::test]
    async fn test_poller_reports_artifact_progress() {
        let (poller, artifacts, _jobs, sub) = setup().await;
        artifacts.save("r", "discovery", "a", "x").await.unwrap();
        artifacts.save("r", "discovery", "b", "y").await.unwrap();

        let handle = poller.start("r", StageKind::Discovery, 4);
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.stop().await;

        let seen = sub.percents("r");
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|p| *p == 37));
    }

    #[tokio::test]
    async fn test_poller_stops_when_run_is_terminal() {
        let (poller, _artifacts, jobs, _sub) = setup().await;
        let handle = poller.start("r", StageKind::Discovery, 4);

        jobs.update("r", |r| r.fail("boom")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(handle.is_finished());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_prompt() {
        let (poller, _artifacts, _jobs, _sub) = setup().await;
        let slow = ArtifactPoller {
            interval: Duration::from_secs(3600),
            ..poller
        };
        let handle = slow.start("r", StageKind::Report, 1);

        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .unwrap();
    }
}
