//! The task executor seam.
//!
//! Content-producing work (model calls, search, scraping) lives outside this
//! crate. Each task names an executor key; the [`ExecutorRegistry`] maps keys
//! to [`TaskExecutor`] implementations.

use crate::core::TaskResult;
use crate::errors::{ConfigError, ExecutorError};
use crate::graph::{TaskCatalog, TaskSpec};
use crate::stage::TaskContext;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

/// Runs a single task.
#[async_trait]
pub trait TaskExecutor: Send + Sync + Debug {
    /// Executes `task_id` with the given context.
    ///
    /// # Errors
    ///
    /// Returns an `ExecutorError` if the external work fails. The controller
    /// never retries.
    async fn execute(&self, task_id: &str, ctx: &TaskContext) -> Result<TaskResult, ExecutorError>;
}

/// A synchronous function-based executor.
pub struct FnExecutor<F>
where
    F: Fn(&str, &TaskContext) -> Result<String, ExecutorError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(&str, &TaskContext) -> Result<String, ExecutorError> + Send + Sync,
{
    /// Creates a new function-based executor.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnExecutor<F>
where
    F: Fn(&str, &TaskContext) -> Result<String, ExecutorError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExecutor").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> TaskExecutor for FnExecutor<F>
where
    F: Fn(&str, &TaskContext) -> Result<String, ExecutorError> + Send + Sync,
{
    async fn execute(&self, task_id: &str, ctx: &TaskContext) -> Result<TaskResult, ExecutorError> {
        (self.func)(task_id, ctx).map(|output| TaskResult::new(task_id, output))
    }
}

type AsyncExecFn = dyn Fn(String, TaskContext) -> BoxFuture<'static, Result<String, ExecutorError>> + Send + Sync;

/// An async function-based executor.
///
/// The closure receives owned copies of the task id and context so the
/// returned future can be `'static`.
pub struct AsyncFnExecutor {
    name: String,
    func: Box<AsyncExecFn>,
}

impl AsyncFnExecutor {
    /// Creates a new async function-based executor.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(String, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ExecutorError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(move |task_id, ctx| func(task_id, ctx).boxed()),
        }
    }
}

impl Debug for AsyncFnExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnExecutor").field("name", &self.name).finish()
    }
}

#[async_trait]
impl TaskExecutor for AsyncFnExecutor {
    async fn execute(&self, task_id: &str, ctx: &TaskContext) -> Result<TaskResult, ExecutorError> {
        let output = (self.func)(task_id.to_string(), ctx.clone()).await?;
        Ok(TaskResult::new(task_id, output))
    }
}

/// Maps executor keys to implementations.
#[derive(Debug, Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under `key`, replacing any previous one.
    pub fn register(&mut self, key: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        self.executors.insert(key.into(), executor);
    }

    /// Builder-style register.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, executor: Arc<dyn TaskExecutor>) -> Self {
        self.register(key, executor);
        self
    }

    /// Gets an executor by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(key).cloned()
    }

    /// Returns true if the key is registered.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.executors.contains_key(key)
    }

    /// Returns the registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Resolves the executor for a task.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownExecutor` if the key is not registered.
    pub fn resolve(&self, spec: &TaskSpec) -> Result<Arc<dyn TaskExecutor>, ConfigError> {
        self.get(&spec.executor_ref)
            .ok_or_else(|| ConfigError::UnknownExecutor {
                task: spec.id.clone(),
                executor: spec.executor_ref.clone(),
            })
    }

    /// Checks that every task in the catalog has a registered executor.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError::UnknownExecutor` found.
    pub fn validate(&self, catalog: &TaskCatalog) -> Result<(), ConfigError> {
        catalog.iter().try_for_each(|spec| self.resolve(spec).map(|_| ()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunInputs;
    use std::collections::BTreeMap;

    fn ctx(task: &str) -> TaskContext {
        let mut deps = BTreeMap::new();
        deps.insert("upstream".to_string(), "hello".to_string());
        TaskContext::new("r", task, deps, Arc::new(RunInputs::new()))
    }

    #[tokio::test]
    async fn test_fn_executor() {
        let exec = FnExecutor::new("echo", |task_id, ctx| {
            Ok(format!("{task_id}:{}", ctx.dependency("upstream").unwrap_or_default()))
        });
        let result = exec.execute("t", &ctx("t")).await.unwrap();

        assert_eq!(result.task_id, "t");
        assert_eq!(result.raw_output, "t:hello");
    }

    #[tokio::test]
    async fn test_async_fn_executor_error() {
        let exec = AsyncFnExecutor::new("fails", |task_id, _ctx| async move {
            Err(ExecutorError::new(task_id, "quota exceeded"))
        });
        let err = exec.execute("t", &ctx("t")).await.unwrap_err();
        assert_eq!(err.message, "quota exceeded");
    }

    #[test]
    fn test_registry_validate() {
        let registry = ExecutorRegistry::new().with(
            "llm",
            Arc::new(FnExecutor::new("llm", |_, _| Ok(String::new()))),
        );
        let catalog = TaskCatalog::new(vec![
            TaskSpec::new("a", "llm"),
            TaskSpec::new("b", "search"),
        ])
        .unwrap();

        let err = registry.validate(&catalog).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownExecutor {
                task: "b".to_string(),
                executor: "search".to_string(),
            }
        );
        assert_eq!(registry.keys(), vec!["llm"]);
    }
}
