//! Sequential, fail-fast execution of one stage.

use super::{ExecutionContext, TaskContext};
use crate::controller::ArtifactStore;
use crate::core::{RunInputs, StageKind};
use crate::errors::{GapflowError, OutputConflictError};
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::executors::ExecutorRegistry;
use crate::graph::{TaskGraph, TaskSpec};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Default character budget above which a task context triggers a warning.
pub const DEFAULT_CONTEXT_WARN_CHARS: usize = 15_000;

/// Characters of output included in `task.completed` events.
pub const PREVIEW_CHARS: usize = 200;

/// A stage that aborted, with every output produced before the failure.
#[derive(Debug)]
pub struct StageFailure {
    /// The triggering error.
    pub error: GapflowError,
    /// The task that failed, if the failure came from a task.
    pub task_id: Option<String>,
    /// Outputs produced so far, including seeds.
    pub context: ExecutionContext,
}

/// Runs a task graph's order strictly sequentially.
///
/// Each task receives only the outputs of its declared dependencies that are
/// present in the stage context. The first executor error aborts the stage.
#[derive(Clone)]
pub struct StageExecutor {
    registry: Arc<ExecutorRegistry>,
    events: Arc<dyn EventSink>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    context_warn_chars: usize,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("executors", &self.registry.keys())
            .field("artifacts", &self.artifacts)
            .field("context_warn_chars", &self.context_warn_chars)
            .finish_non_exhaustive()
    }
}

impl StageExecutor {
    /// Creates an executor that emits no events and persists nothing.
    #[must_use]
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            registry,
            events: Arc::new(NoOpEventSink),
            artifacts: None,
            context_warn_chars: DEFAULT_CONTEXT_WARN_CHARS,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Persists every task output as it is produced.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Sets the context size warning threshold.
    #[must_use]
    pub fn with_context_warn_chars(mut self, chars: usize) -> Self {
        self.context_warn_chars = chars;
        self
    }

    /// Returns the executor registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    /// Executes `graph` in order, starting from `seed`.
    ///
    /// # Errors
    ///
    /// Returns a [`StageFailure`] holding the error and all outputs produced
    /// before it. A task whose id is already in the context is an
    /// `OutputConflict`; an unregistered executor is a `Config` error.
    pub async fn run(
        &self,
        run_id: &str,
        stage: StageKind,
        graph: &TaskGraph,
        seed: ExecutionContext,
        inputs: Arc<RunInputs>,
    ) -> Result<ExecutionContext, StageFailure> {
        let total = graph.len();
        let started = Instant::now();
        let mut ctx = seed;

        self.events
            .emit(&PipelineEvent::StageStarted {
                run_id: run_id.to_string(),
                stage,
                total,
            })
            .await;

        for (index, spec) in graph.iter().enumerate() {
            if ctx.contains(&spec.id) {
                let error = OutputConflictError::new(spec.id.clone()).into();
                return Err(self.abort(run_id, stage, Some(&spec.id), error, ctx).await);
            }
            let executor = match self.registry.resolve(spec) {
                Ok(executor) => executor,
                Err(e) => return Err(self.abort(run_id, stage, Some(&spec.id), e.into(), ctx).await),
            };

            let task_ctx = assemble_context(run_id, spec, &ctx, Arc::clone(&inputs));
            self.preflight(stage, &task_ctx);

            self.events
                .emit(&PipelineEvent::TaskStarted {
                    run_id: run_id.to_string(),
                    stage,
                    task_id: spec.id.clone(),
                    index,
                    total,
                })
                .await;

            let mut result = match executor.execute(&spec.id, &task_ctx).await {
                Ok(result) => result,
                Err(e) => {
                    self.events
                        .emit(&PipelineEvent::TaskFailed {
                            run_id: run_id.to_string(),
                            stage,
                            task_id: spec.id.clone(),
                            index,
                            total,
                            error: e.message.clone(),
                        })
                        .await;
                    return Err(self.abort(run_id, stage, Some(&spec.id), e.into(), ctx).await);
                }
            };
            if result.task_id != spec.id {
                warn!(
                    run_id,
                    task_id = %spec.id,
                    reported = %result.task_id,
                    "Executor returned a result for a different task id; using the scheduled id"
                );
                result.task_id = spec.id.clone();
            }

            self.persist(run_id, stage, &spec.id, &result.raw_output).await;
            let preview = result.preview(PREVIEW_CHARS);
            if let Err(e) = ctx.insert(result) {
                return Err(self.abort(run_id, stage, Some(&spec.id), e.into(), ctx).await);
            }

            self.events
                .emit(&PipelineEvent::TaskCompleted {
                    run_id: run_id.to_string(),
                    stage,
                    task_id: spec.id.clone(),
                    index,
                    total,
                    preview,
                })
                .await;
        }

        self.events
            .emit(&PipelineEvent::StageCompleted {
                run_id: run_id.to_string(),
                stage,
                duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            })
            .await;

        Ok(ctx)
    }

    async fn abort(
        &self,
        run_id: &str,
        stage: StageKind,
        task_id: Option<&str>,
        error: GapflowError,
        context: ExecutionContext,
    ) -> StageFailure {
        self.events
            .emit(&PipelineEvent::StageFailed {
                run_id: run_id.to_string(),
                stage,
                error: error.to_string(),
            })
            .await;
        StageFailure {
            error,
            task_id: task_id.map(str::to_string),
            context,
        }
    }

    fn preflight(&self, stage: StageKind, task_ctx: &TaskContext) {
        let chars = task_ctx.total_chars();
        if chars > self.context_warn_chars {
            warn!(
                run_id = %task_ctx.run_id,
                stage = %stage,
                task_id = %task_ctx.task_id,
                context_chars = chars,
                limit = self.context_warn_chars,
                dependencies = task_ctx.dependencies.len(),
                "Task context exceeds size budget"
            );
        } else {
            debug!(
                task_id = %task_ctx.task_id,
                context_chars = chars,
                "Task context assembled"
            );
        }
    }

    async fn persist(&self, run_id: &str, stage: StageKind, task_id: &str, content: &str) {
        let Some(artifacts) = &self.artifacts else {
            return;
        };
        if let Err(e) = artifacts.save(run_id, stage.as_str(), task_id, content).await {
            warn!(run_id, task_id, error = %e, "Failed to persist task artifact; continuing");
        }
    }
}

/// Collects the outputs of `spec`'s declared dependencies from `ctx`.
///
/// Dependencies without an output are left out.
fn assemble_context(run_id: &str, spec: &TaskSpec, ctx: &ExecutionContext, inputs: Arc<RunInputs>) -> TaskContext {
    let dependencies: BTreeMap<String, String> = spec
        .dependencies
        .iter()
        .filter_map(|dep| ctx.output(dep).map(|out| (dep.clone(), out.to_string())))
        .collect();
    TaskContext::new(run_id, spec.id.clone(), dependencies, inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::InMemoryArtifactStore;
    use crate::events::CollectingEventSink;
    use crate::graph::{GraphBuilder, TaskCatalog};
    use crate::testing::{FailingExecutor, ScriptedExecutor};
    use pretty_assertions::assert_eq;

    fn chain() -> TaskGraph {
        let catalog = TaskCatalog::new(vec![
            TaskSpec::new("discover", "scripted"),
            TaskSpec::new("compact", "scripted").with_dependency("discover"),
            TaskSpec::new("gate", "scripted").with_dependency("compact"),
        ])
        .unwrap();
        GraphBuilder::new(Arc::new(catalog)).build_all().unwrap()
    }

    fn executor_with(scripted: Arc<ScriptedExecutor>) -> StageExecutor {
        let registry = ExecutorRegistry::new().with("scripted", scripted);
        StageExecutor::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_each_task_sees_only_its_dependencies() {
        let scripted = Arc::new(ScriptedExecutor::new().with_output("discover", "D").with_output("compact", "C"));
        let exec = executor_with(scripted.clone());

        let ctx = exec
            .run("r", StageKind::Discovery, &chain(), ExecutionContext::new(), Arc::new(RunInputs::new()))
            .await
            .unwrap();

        assert_eq!(scripted.calls(), vec!["discover", "compact", "gate"]);
        assert!(scripted.context_for("discover").unwrap().dependencies.is_empty());
        assert_eq!(
            scripted.context_for("compact").unwrap().dependencies.keys().collect::<Vec<_>>(),
            vec!["discover"]
        );
        assert_eq!(scripted.context_for("gate").unwrap().dependency("compact"), Some("C"));
        assert_eq!(scripted.context_for("gate").unwrap().dependency("discover"), None);
        assert_eq!(ctx.len(), 3);
    }

    #[tokio::test]
    async fn test_seeded_outputs_are_visible() {
        let scripted = Arc::new(ScriptedExecutor::new());
        let exec = executor_with(scripted.clone());
        let catalog = TaskCatalog::new(vec![
            TaskSpec::new("review", "scripted"),
            TaskSpec::new("revise", "scripted").with_dependency("review"),
        ])
        .unwrap();
        let allow = vec!["revise".to_string()];
        let graph = GraphBuilder::new(Arc::new(catalog)).build(Some(&allow)).unwrap();
        let seed = ExecutionContext::seeded([("review", "VERDICT: HOLD")]).unwrap();

        let ctx = exec
            .run("r", StageKind::Revision, &graph, seed, Arc::new(RunInputs::new()))
            .await
            .unwrap();

        assert_eq!(scripted.context_for("revise").unwrap().dependency("review"), Some("VERDICT: HOLD"));
        assert_eq!(ctx.len(), 2);
    }

    #[tokio::test]
    async fn test_fail_fast_returns_partial_context() {
        let scripted = Arc::new(ScriptedExecutor::new());
        let registry = ExecutorRegistry::new()
            .with("scripted", scripted.clone())
            .with("failing", Arc::new(FailingExecutor::new("upstream timeout")));
        let events = Arc::new(CollectingEventSink::new());
        let exec = StageExecutor::new(Arc::new(registry)).with_events(events.clone());

        let catalog = TaskCatalog::new(vec![
            TaskSpec::new("discover", "scripted"),
            TaskSpec::new("compact", "failing").with_dependency("discover"),
            TaskSpec::new("gate", "scripted").with_dependency("compact"),
        ])
        .unwrap();
        let graph = GraphBuilder::new(Arc::new(catalog)).build_all().unwrap();

        let failure = exec
            .run("r", StageKind::Discovery, &graph, ExecutionContext::new(), Arc::new(RunInputs::new()))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, GapflowError::Executor(_)));
        assert_eq!(failure.task_id.as_deref(), Some("compact"));
        assert!(failure.context.contains("discover"));
        assert!(!failure.context.contains("gate"));
        assert_eq!(scripted.calls(), vec!["discover"]);
        assert_eq!(events.events_of_type("task.failed").len(), 1);
        assert_eq!(events.events_of_type("stage.failed").len(), 1);
        assert!(events.events_of_type("stage.completed").is_empty());
    }

    #[tokio::test]
    async fn test_events_carry_index_and_preview() {
        let long = "x".repeat(500);
        let scripted = Arc::new(ScriptedExecutor::new().with_output("discover", long));
        let events = Arc::new(CollectingEventSink::new());
        let exec = executor_with(scripted).with_events(events.clone());

        exec.run("r", StageKind::Discovery, &chain(), ExecutionContext::new(), Arc::new(RunInputs::new()))
            .await
            .unwrap();

        let types: Vec<_> = events.events().iter().map(PipelineEvent::event_type).collect();
        assert_eq!(
            types,
            vec![
                "stage.started",
                "task.started",
                "task.completed",
                "task.started",
                "task.completed",
                "task.started",
                "task.completed",
                "stage.completed",
            ]
        );
        match &events.events_of_type("task.completed")[0] {
            PipelineEvent::TaskCompleted { index, total, preview, .. } => {
                assert_eq!((*index, *total), (0, 3));
                assert_eq!(preview.chars().count(), PREVIEW_CHARS + 3);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_seeded_task_is_output_conflict() {
        let scripted = Arc::new(ScriptedExecutor::new());
        let exec = executor_with(scripted.clone());
        let seed = ExecutionContext::seeded([("compact", "already")]).unwrap();

        let failure = exec
            .run("r", StageKind::Discovery, &chain(), seed, Arc::new(RunInputs::new()))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, GapflowError::OutputConflict(_)));
        assert_eq!(scripted.calls(), vec!["discover"]);
        assert_eq!(failure.context.output("compact"), Some("already"));
    }

    #[tokio::test]
    async fn test_unknown_executor_aborts() {
        let exec = StageExecutor::new(Arc::new(ExecutorRegistry::new()));
        let failure = exec
            .run("r", StageKind::Discovery, &chain(), ExecutionContext::new(), Arc::new(RunInputs::new()))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, GapflowError::Config(_)));
    }

    #[tokio::test]
    async fn test_outputs_are_persisted_per_task() {
        let scripted = Arc::new(ScriptedExecutor::new().with_output("discover", "D"));
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let exec = executor_with(scripted).with_artifacts(artifacts.clone());

        exec.run("r", StageKind::Discovery, &chain(), ExecutionContext::new(), Arc::new(RunInputs::new()))
            .await
            .unwrap();

        let saved = artifacts.load_stage("r", "discovery").await.unwrap();
        assert_eq!(saved.len(), 3);
        assert_eq!(saved[0].content, "D");
    }

    #[tokio::test]
    async fn test_large_context_still_executes() {
        let scripted = Arc::new(ScriptedExecutor::new().with_output("discover", "y".repeat(50)));
        let exec = executor_with(scripted.clone()).with_context_warn_chars(10);

        let ctx = exec
            .run("r", StageKind::Discovery, &chain(), ExecutionContext::new(), Arc::new(RunInputs::new()))
            .await
            .unwrap();
        assert_eq!(ctx.len(), 3);
    }
}
