//! Controller construction with validation.

use super::{ArtifactStore, Precheck, PipelineController, RequiredFieldsPrecheck};
use super::runner::Inner;
use crate::config::PipelineConfig;
use crate::core::{MarkerVerdictExtractor, VerdictExtractor};
use crate::errors::GapflowError;
use crate::events::{EventSink, FanoutEventSink, LoggingEventSink};
use crate::executors::ExecutorRegistry;
use crate::graph::GraphBuilder;
use crate::progress::{ArtifactPoller, NoOpProgressSubscriber, ProgressReporter, ProgressSubscriber, StoreProbe};
use crate::stage::StageExecutor;
use crate::store::{JobStore, ReconcileReport};
use dashmap::DashSet;
use std::sync::Arc;
use tracing::info;

/// Builder for a validated [`PipelineController`].
///
/// Only the config and the executor registry are required. Defaults:
/// in-memory job store, the artifact store named by `config.store`,
/// [`RequiredFieldsPrecheck`], [`MarkerVerdictExtractor`] and no progress
/// subscriber.
pub struct ControllerBuilder {
    config: PipelineConfig,
    registry: ExecutorRegistry,
    jobs: Option<Arc<JobStore>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    subscriber: Arc<dyn ProgressSubscriber>,
    precheck: Arc<dyn Precheck>,
    extractor: Arc<dyn VerdictExtractor>,
    events: Option<Arc<dyn EventSink>>,
}

impl std::fmt::Debug for ControllerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerBuilder")
            .field("tasks", &self.config.tasks.len())
            .field("executors", &self.registry.keys())
            .field("precheck", &self.precheck)
            .finish_non_exhaustive()
    }
}

impl ControllerBuilder {
    /// Starts a builder.
    #[must_use]
    pub fn new(config: PipelineConfig, registry: ExecutorRegistry) -> Self {
        Self {
            config,
            registry,
            jobs: None,
            artifacts: None,
            subscriber: Arc::new(NoOpProgressSubscriber),
            precheck: Arc::new(RequiredFieldsPrecheck::default()),
            extractor: Arc::new(MarkerVerdictExtractor),
            events: None,
        }
    }

    /// Uses an existing job store.
    #[must_use]
    pub fn job_store(mut self, jobs: Arc<JobStore>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Uses an existing artifact store.
    #[must_use]
    pub fn artifact_store(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Sets the progress subscriber.
    #[must_use]
    pub fn progress_subscriber(mut self, subscriber: Arc<dyn ProgressSubscriber>) -> Self {
        self.subscriber = subscriber;
        self
    }

    /// Sets the input precheck.
    #[must_use]
    pub fn precheck(mut self, precheck: Arc<dyn Precheck>) -> Self {
        self.precheck = precheck;
        self
    }

    /// Sets the verdict extractor.
    #[must_use]
    pub fn verdict_extractor(mut self, extractor: Arc<dyn VerdictExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Adds a sink receiving every pipeline event.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Opens the job store named by `config.store` (unless one was given),
    /// reconciles it, then builds.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store cannot be opened, or any
    /// error from [`build`](Self::build).
    pub async fn open(mut self) -> Result<(PipelineController, ReconcileReport), GapflowError> {
        let report = match self.jobs {
            Some(ref jobs) => jobs.reconcile().await?,
            None => {
                let (jobs, report) = self.config.store.open_job_store().await?;
                self.jobs = Some(Arc::new(jobs));
                report
            }
        };
        Ok((self.build()?, report))
    }

    /// Validates the configuration and assembles the controller.
    ///
    /// # Errors
    ///
    /// Returns `GapflowError::Config` for invalid task references, unknown
    /// executors, or a cycle anywhere in the task graph.
    pub fn build(self) -> Result<PipelineController, GapflowError> {
        self.config.validate()?;
        let catalog = Arc::new(self.config.catalog()?);
        self.registry.validate(&catalog)?;

        let graphs = GraphBuilder::new(Arc::clone(&catalog));
        graphs.build_all()?;
        let discovery = graphs.build(Some(self.config.discovery_tasks().as_slice()))?;
        let revision = graphs.build(Some(self.config.revision_tasks().as_slice()))?;
        let report = graphs.build(Some(self.config.report_tasks().as_slice()))?;

        let jobs = self.jobs.unwrap_or_else(|| Arc::new(JobStore::in_memory()));
        let artifacts = self.artifacts.unwrap_or_else(|| self.config.store.artifact_store());
        let progress = Arc::new(ProgressReporter::new(self.config.progress, self.subscriber));

        let mut fanout = FanoutEventSink::new();
        if let Some(sink) = self.events {
            fanout = fanout.with_sink(sink);
        }
        let events: Arc<dyn EventSink> = Arc::new(
            fanout
                .with_sink(Arc::new(LoggingEventSink::default()))
                .with_sink(Arc::clone(&progress) as Arc<dyn EventSink>),
        );

        let executor = StageExecutor::new(Arc::new(self.registry))
            .with_events(Arc::clone(&events))
            .with_artifacts(Arc::clone(&artifacts))
            .with_context_warn_chars(self.config.runtime.context_warn_chars);

        let poller = self.config.runtime.poll_interval().map(|interval| {
            ArtifactPoller::new(
                Arc::clone(&progress),
                Arc::new(StoreProbe::new(Arc::clone(&artifacts))),
                Arc::clone(&jobs),
                interval,
            )
        });

        info!(
            tasks = catalog.len(),
            discovery = discovery.len(),
            revision = revision.len(),
            report = report.len(),
            polling = poller.is_some(),
            "Pipeline controller ready"
        );

        Ok(PipelineController::from_inner(Inner {
            stages: self.config.stages.clone(),
            revision_inputs: self.config.revision_inputs.clone(),
            default_options: self.config.runtime.run_options(),
            artifacts_per_task: self.config.runtime.poll_artifacts_per_task,
            discovery,
            revision,
            report,
            executor,
            jobs,
            artifacts,
            progress,
            events,
            precheck: self.precheck,
            extractor: self.extractor,
            poller,
            claimed_ids: DashSet::new(),
        }))
    }
}
