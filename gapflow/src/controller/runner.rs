//! The gated run state machine.

use super::{ArtifactStore, Precheck, PrecheckOutcome, PRECHECK_STAGE};
use crate::config::StagesConfig;
use crate::core::{PipelineRun, RunInputs, RunOptions, RunStage, StageKind, Verdict, VerdictExtractor};
use crate::errors::GapflowError;
use crate::events::{EventSink, PipelineEvent};
use crate::graph::TaskGraph;
use crate::progress::{ArtifactPoller, PollerHandle, ProgressReporter};
use crate::stage::{ExecutionContext, StageExecutor, StageFailure};
use crate::store::JobStore;
use crate::utils::{generate_run_id, now_utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Run input carrying the final verdict marker into the report stage.
pub const GATE_VERDICT_KEY: &str = "gate_verdict";

/// Task id of the artifact written for rejected runs.
pub const REJECTION_ARTIFACT: &str = "rejection";

/// Task order of each stage, as reported by [`PipelineController::dry_run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    /// Discovery order.
    pub discovery: Vec<String>,
    /// Revision order; empty when no revision tasks are configured.
    pub revision: Vec<String>,
    /// Report order.
    pub report: Vec<String>,
}

pub(super) struct Inner {
    pub(super) stages: StagesConfig,
    pub(super) revision_inputs: BTreeMap<String, Vec<String>>,
    pub(super) default_options: RunOptions,
    pub(super) artifacts_per_task: usize,
    pub(super) discovery: TaskGraph,
    pub(super) revision: TaskGraph,
    pub(super) report: TaskGraph,
    pub(super) executor: StageExecutor,
    pub(super) jobs: Arc<JobStore>,
    pub(super) artifacts: Arc<dyn ArtifactStore>,
    pub(super) progress: Arc<ProgressReporter>,
    pub(super) events: Arc<dyn EventSink>,
    pub(super) precheck: Arc<dyn Precheck>,
    pub(super) extractor: Arc<dyn VerdictExtractor>,
    pub(super) poller: Option<ArtifactPoller>,
    pub(super) claimed_ids: DashSet<String>,
}

/// Drives runs through precheck, discovery, the gate, optional revision and
/// the report.
///
/// Cloning is cheap; clones share stores and progress state.
#[derive(Clone)]
pub struct PipelineController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController")
            .field("plan", &self.dry_run())
            .field("executor", &self.inner.executor)
            .finish_non_exhaustive()
    }
}

/// Which stage follows the gate for a verdict.
///
/// Only HOLD, or NO with `revise_on_no`, leads to revision, and only when
/// revision is enabled.
#[must_use]
pub fn next_stage_after_gate(verdict: Verdict, options: &RunOptions) -> RunStage {
    if !options.revision_enabled {
        return RunStage::ReportOnly;
    }
    match verdict {
        Verdict::Hold => RunStage::RevisionRunning,
        Verdict::No if options.revise_on_no => RunStage::RevisionRunning,
        Verdict::Go | Verdict::No | Verdict::Unknown => RunStage::ReportOnly,
    }
}

impl PipelineController {
    pub(super) fn from_inner(inner: Inner) -> Self {
        Self { inner: Arc::new(inner) }
    }

    /// Options used when a caller has none of its own.
    #[must_use]
    pub fn default_options(&self) -> RunOptions {
        self.inner.default_options
    }

    /// Returns the job store.
    #[must_use]
    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.inner.jobs
    }

    /// Returns the artifact store.
    #[must_use]
    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.inner.artifacts
    }

    /// Returns the progress reporter.
    #[must_use]
    pub fn progress(&self) -> &Arc<ProgressReporter> {
        &self.inner.progress
    }

    /// Reports each stage's resolved order without running anything.
    #[must_use]
    pub fn dry_run(&self) -> StagePlan {
        StagePlan {
            discovery: self.inner.discovery.order().to_vec(),
            revision: self.inner.revision.order().to_vec(),
            report: self.inner.report.order().to_vec(),
        }
    }

    /// Creates a run record and drives it on a spawned task.
    ///
    /// Returns the run id as soon as the record exists. A panicking executor
    /// still leaves the record FAILED.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` leaves room for admission checks.
    pub async fn submit(&self, inputs: RunInputs, options: RunOptions) -> Result<String, GapflowError> {
        let run = self.create(&inputs, options).await;
        let run_id = run.run_id.clone();
        drop(self.spawn_supervised(run, inputs));
        Ok(run_id)
    }

    /// Creates a run record and waits for it to reach a terminal stage.
    ///
    /// Pipeline failures, including executor panics, are reported through
    /// the returned record, not as errors.
    ///
    /// # Errors
    ///
    /// Returns a persistence error only if a crashed run's record could not
    /// be marked FAILED.
    pub async fn execute(&self, inputs: RunInputs, options: RunOptions) -> Result<PipelineRun, GapflowError> {
        let run = self.create(&inputs, options).await;
        let run_id = run.run_id.clone();
        match self.spawn_supervised(run, inputs).await {
            Ok(result) => result,
            Err(e) => Err(GapflowError::WorkerCrashed {
                run_id,
                message: e.to_string(),
            }),
        }
    }

    /// Loads a run record.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store cannot be read.
    pub async fn get(&self, run_id: &str) -> Result<Option<PipelineRun>, GapflowError> {
        self.inner.jobs.get(run_id).await
    }

    /// Lists up to `limit` runs, newest first.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store cannot be read.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<PipelineRun>, GapflowError> {
        self.inner.jobs.list_recent(limit).await
    }

    /// Deletes a run record and its progress state.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the record cannot be removed.
    pub async fn purge(&self, run_id: &str) -> Result<bool, GapflowError> {
        let removed = self.inner.jobs.purge(run_id).await?;
        self.inner.progress.forget(run_id);
        self.inner.claimed_ids.remove(run_id);
        Ok(removed)
    }

    async fn create(&self, inputs: &RunInputs, options: RunOptions) -> PipelineRun {
        let run_id = self.allocate_run_id(inputs).await;
        let run = PipelineRun::new(run_id, options);
        self.save(&run).await;
        info!(
            run_id = %run.run_id,
            revise_on_no = options.revise_on_no,
            revision_enabled = options.revision_enabled,
            "Run created"
        );
        run
    }

    async fn allocate_run_id(&self, inputs: &RunInputs) -> String {
        let base = generate_run_id(
            inputs.get_non_blank("idea_one_liner"),
            inputs.get_non_blank("business_type"),
            now_utc(),
        );
        let mut candidate = base.clone();
        let mut n = 2;
        loop {
            let stored = matches!(self.inner.jobs.get(&candidate).await, Ok(Some(_)));
            if !stored && self.inner.claimed_ids.insert(candidate.clone()) {
                return candidate;
            }
            candidate = format!("{base}_{n}");
            n += 1;
        }
    }

    async fn save(&self, run: &PipelineRun) {
        if let Err(e) = self.inner.jobs.put(run).await {
            warn!(run_id = %run.run_id, stage = %run.stage, error = %e, "Failed to persist run record; continuing in memory");
        }
    }

    async fn advance(&self, run: &mut PipelineRun, next: RunStage) -> Result<(), GapflowError> {
        run.transition(next)?;
        debug!(run_id = %run.run_id, stage = %next, "Run stage changed");
        self.save(run).await;
        Ok(())
    }

    /// Drives `run` on a worker task watched by a supervisor task.
    ///
    /// The supervisor owns the worker's handle; if the worker dies the stored
    /// record is failed with the panic message.
    fn spawn_supervised(
        &self,
        run: PipelineRun,
        inputs: RunInputs,
    ) -> JoinHandle<Result<PipelineRun, GapflowError>> {
        let run_id = run.run_id.clone();
        let this = self.clone();
        let worker = tokio::spawn(async move { this.drive(run, inputs).await });
        let this = self.clone();
        tokio::spawn(async move {
            match worker.await {
                Ok(run) => Ok(run),
                Err(e) => this.fail_crashed(&run_id, e).await,
            }
        })
    }

    async fn fail_crashed(&self, run_id: &str, err: JoinError) -> Result<PipelineRun, GapflowError> {
        let crash = GapflowError::WorkerCrashed {
            run_id: run_id.to_string(),
            message: join_error_message(err),
        };
        error!(run_id, error = %crash, "Run worker crashed");
        let message = crash.to_string();
        let run = self
            .inner
            .jobs
            .update(run_id, move |r| {
                if !r.is_terminal() {
                    r.fail(message)?;
                }
                Ok(r.clone())
            })
            .await?;
        self.inner
            .events
            .emit(&PipelineEvent::RunFinished {
                run_id: run.run_id.clone(),
                stage: run.stage,
            })
            .await;
        Ok(run)
    }

    async fn drive(&self, mut run: PipelineRun, inputs: RunInputs) -> PipelineRun {
        let started = Instant::now();
        self.inner
            .events
            .emit(&PipelineEvent::RunStarted {
                run_id: run.run_id.clone(),
            })
            .await;

        if let Err(e) = self.run_stages(&mut run, inputs).await {
            error!(run_id = %run.run_id, stage = %run.stage, error = %e, "Run failed");
            if let Err(te) = run.fail(e.to_string()) {
                warn!(run_id = %run.run_id, error = %te, "Run already terminal; failure not recorded");
            }
        }

        run.total_elapsed_secs = Some(started.elapsed().as_secs_f64());
        run.touch();
        self.save(&run).await;
        self.inner
            .events
            .emit(&PipelineEvent::RunFinished {
                run_id: run.run_id.clone(),
                stage: run.stage,
            })
            .await;
        info!(
            run_id = %run.run_id,
            stage = %run.stage,
            verdict = %run.verdict,
            revised = run.revised,
            elapsed_secs = run.total_elapsed_secs.unwrap_or_default(),
            "Run finished"
        );
        run
    }

    async fn run_stages(&self, run: &mut PipelineRun, mut inputs: RunInputs) -> Result<(), GapflowError> {
        let inner = &self.inner;
        let run_id = run.run_id.clone();

        inner.precheck.prepare(&mut inputs);
        if let PrecheckOutcome::Reject(reasons) = inner.precheck.check(&inputs) {
            warn!(run_id = %run_id, reasons = ?reasons, "Run rejected by precheck");
            self.save_rejection(&run_id, &reasons).await;
            run.reject(reasons)?;
            return Ok(());
        }
        let inputs = Arc::new(inputs);

        self.advance(run, RunStage::DiscoveryRunning).await?;
        let mut context = self
            .run_stage(run, StageKind::Discovery, &inner.discovery, ExecutionContext::new(), Arc::clone(&inputs))
            .await
            .map_err(|failure| failure.error)?;

        let gate_output = context.output(&inner.stages.gate_task).unwrap_or_default();
        run.verdict = self.extract_verdict(&run_id, &inner.stages.gate_task, gate_output);
        self.announce_verdict(&run_id, &inner.stages.gate_task, run.verdict).await;
        self.advance(run, RunStage::GateEvaluated).await?;

        let next = if inner.revision.is_empty() {
            RunStage::ReportOnly
        } else {
            next_stage_after_gate(run.verdict, &run.options)
        };
        info!(run_id = %run_id, verdict = %run.verdict, next = %next, "Gate evaluated");
        self.advance(run, next).await?;

        if next == RunStage::RevisionRunning {
            self.revise(run, &mut context, Arc::clone(&inputs)).await;
        }

        self.advance(run, RunStage::ReportRunning).await?;
        let mut report_inputs = (*inputs).clone();
        report_inputs.insert(GATE_VERDICT_KEY, run.verdict.as_marker());
        self.run_stage(run, StageKind::Report, &inner.report, context, Arc::new(report_inputs))
            .await
            .map_err(|failure| failure.error)?;

        self.advance(run, RunStage::Completed).await
    }

    /// Runs the revision stage. Failures are recorded on the run, not raised.
    async fn revise(&self, run: &mut PipelineRun, context: &mut ExecutionContext, inputs: Arc<RunInputs>) {
        let inner = &self.inner;
        let run_id = run.run_id.clone();
        let seed = self.revision_seed(&run_id).await;
        run.revised = true;

        let produced = match self
            .run_stage(run, StageKind::Revision, &inner.revision, seed, inputs)
            .await
        {
            Ok(revised) => {
                let recheck = revised.output(&inner.stages.recheck_task).unwrap_or_default();
                let recheck = self.extract_verdict(&run_id, &inner.stages.recheck_task, recheck);
                let verdict = Verdict::after_revision(run.verdict, recheck);
                self.announce_verdict(&run_id, &inner.stages.recheck_task, verdict).await;
                if verdict != run.verdict {
                    info!(run_id = %run_id, from = %run.verdict, to = %verdict, "Verdict changed by revision");
                }
                run.verdict = verdict;
                revised
            }
            Err(failure) => {
                warn!(
                    run_id = %run_id,
                    task_id = failure.task_id.as_deref().unwrap_or("-"),
                    error = %failure.error,
                    "Revision failed; reporting with the context available"
                );
                run.revision_error = Some(failure.error.to_string());
                failure.context
            }
        };

        for result in produced.iter().filter(|r| inner.revision.contains(&r.task_id)) {
            if let Err(e) = context.insert(result.clone()) {
                warn!(run_id = %run_id, error = %e, "Revision output shadows an existing output; kept the original");
            }
        }
        self.save(run).await;
    }

    /// Seeds the revision stage from discovery artifacts.
    ///
    /// Each dependency of a revision task that lies outside the revision
    /// stage is looked up by the keywords configured for it, or by its own id.
    /// The first keyword that matches wins; no match seeds an empty string.
    async fn revision_seed(&self, run_id: &str) -> ExecutionContext {
        let inner = &self.inner;
        let external: BTreeSet<&String> = inner
            .revision
            .iter()
            .flat_map(|spec| spec.dependencies.iter())
            .filter(|dep| !inner.revision.contains(dep))
            .collect();

        let mut seed = ExecutionContext::new();
        for dep in external {
            let keywords = inner
                .revision_inputs
                .get(dep)
                .map_or_else(|| vec![dep.clone()], Clone::clone);
            let content = self.find_discovery_artifact(run_id, &keywords).await.unwrap_or_else(|| {
                warn!(run_id, seed = %dep, keywords = ?keywords, "No discovery artifact for revision input; using empty text");
                String::new()
            });
            if let Err(e) = seed.seed(dep.clone(), content) {
                warn!(run_id, error = %e, "Duplicate revision seed");
            }
        }
        seed
    }

    async fn find_discovery_artifact(&self, run_id: &str, keywords: &[String]) -> Option<String> {
        for keyword in keywords {
            match self
                .inner
                .artifacts
                .find_by_keyword(run_id, StageKind::Discovery.as_str(), keyword)
                .await
            {
                Ok(Some(content)) => return Some(content),
                Ok(None) => {}
                Err(e) => warn!(run_id, keyword = %keyword, error = %e, "Artifact lookup failed"),
            }
        }
        None
    }

    fn extract_verdict(&self, run_id: &str, source_task: &str, text: &str) -> Verdict {
        let verdict = self.inner.extractor.extract(text);
        if !verdict.is_known() {
            debug!(run_id, source_task, "No verdict marker found; treating as UNKNOWN");
        }
        verdict
    }

    async fn announce_verdict(&self, run_id: &str, source_task: &str, verdict: Verdict) {
        self.inner
            .events
            .emit(&PipelineEvent::VerdictExtracted {
                run_id: run_id.to_string(),
                source_task: source_task.to_string(),
                verdict,
            })
            .await;
    }

    async fn run_stage(
        &self,
        run: &mut PipelineRun,
        stage: StageKind,
        graph: &TaskGraph,
        seed: ExecutionContext,
        inputs: Arc<RunInputs>,
    ) -> Result<ExecutionContext, StageFailure> {
        let poller = self.start_poller(&run.run_id, stage, graph.len());
        let started = Instant::now();
        let result = self
            .inner
            .executor
            .run(&run.run_id, stage, graph, seed, inputs)
            .await;
        if let Some(handle) = poller {
            handle.stop().await;
        }

        run.record_stage_time(stage.as_str(), started.elapsed().as_secs_f64());
        if let Err(failure) = &result {
            warn!(
                run_id = %run.run_id,
                stage = %stage,
                task_id = failure.task_id.as_deref().unwrap_or("-"),
                completed = failure.context.len(),
                error = %failure.error,
                "Stage aborted"
            );
        }
        result
    }

    fn start_poller(&self, run_id: &str, stage: StageKind, tasks: usize) -> Option<PollerHandle> {
        let poller = self.inner.poller.as_ref()?;
        let expected = tasks.saturating_mul(self.inner.artifacts_per_task);
        Some(poller.start(run_id, stage, expected))
    }

    async fn save_rejection(&self, run_id: &str, reasons: &[String]) {
        let mut body = String::from("# Precheck rejected\n\n");
        for reason in reasons {
            body.push_str("- ");
            body.push_str(reason);
            body.push('\n');
        }
        if let Err(e) = self
            .inner
            .artifacts
            .save(run_id, PRECHECK_STAGE, REJECTION_ARTIFACT, &body)
            .await
        {
            warn!(run_id, error = %e, "Failed to persist rejection artifact");
        }
    }
}

fn join_error_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_table() {
        let default = RunOptions::default();
        let on_no = RunOptions::default().with_revise_on_no(true);
        let disabled = RunOptions::default().with_revision_enabled(false);

        assert_eq!(next_stage_after_gate(Verdict::Go, &default), RunStage::ReportOnly);
        assert_eq!(next_stage_after_gate(Verdict::Hold, &default), RunStage::RevisionRunning);
        assert_eq!(next_stage_after_gate(Verdict::No, &default), RunStage::ReportOnly);
        assert_eq!(next_stage_after_gate(Verdict::No, &on_no), RunStage::RevisionRunning);
        assert_eq!(next_stage_after_gate(Verdict::Unknown, &on_no), RunStage::ReportOnly);
        assert_eq!(next_stage_after_gate(Verdict::Hold, &disabled), RunStage::ReportOnly);
    }

    #[tokio::test]
    async fn test_join_error_message_reads_panic_payload() {
        let err = tokio::spawn(async { panic!("executor blew up") }).await.unwrap_err();
        assert_eq!(join_error_message(err), "executor blew up");

        let code = 7;
        let err = tokio::spawn(async move { panic!("code {code}") }).await.unwrap_err();
        assert_eq!(join_error_message(err), "code 7");
    }
}
