//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is read from TOML. Lookup order for
//! [`load_default`]:
//!
//! 1. the file named by `GAPFLOW_CONFIG`
//! 2. `./gapflow.toml`
//! 3. the built-in pipeline (`config/default.toml`)
//!
//! `GAPFLOW_REVISE_ON_NO`, `GAPFLOW_STORE_DIR` and `GAPFLOW_POLL_INTERVAL_MS`
//! override the loaded values.

use crate::controller::{ArtifactStore, FileArtifactStore, InMemoryArtifactStore};
use crate::core::RunOptions;
use crate::errors::{ConfigError, GapflowError};
use crate::graph::{TaskCatalog, TaskSpec};
use crate::progress::ProgressWindows;
use crate::stage::DEFAULT_CONTEXT_WARN_CHARS;
use crate::store::{FileJobBackend, InMemoryJobBackend, JobStore, ReconcileReport};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const BUILTIN_CONFIG: &str = include_str!("../../config/default.toml");

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "GAPFLOW_CONFIG";
/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "gapflow.toml";

/// Complete pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Every task, in declaration order.
    pub tasks: Vec<TaskSpec>,
    /// Which tasks play which role.
    pub stages: StagesConfig,
    /// Progress windows per stage.
    #[serde(default)]
    pub progress: ProgressWindows,
    /// Seed id to artifact keywords for the revision stage.
    #[serde(default)]
    pub revision_inputs: BTreeMap<String, Vec<String>>,
    /// Runtime knobs.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Persistence settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Task roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    /// Discovery task whose output carries the gate verdict.
    pub gate_task: String,
    /// Revision task whose output carries the re-checked verdict.
    pub recheck_task: String,
    /// Tasks run only by the revision stage.
    #[serde(default)]
    pub revision_tasks: Vec<String>,
    /// The single report task.
    pub report_task: String,
}

/// Runtime knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Run the revision stage on a NO verdict.
    #[serde(default)]
    pub revise_on_no: bool,
    /// Allow the revision stage at all.
    #[serde(default = "default_revision_enabled")]
    pub revision_enabled: bool,
    /// Context size above which a warning is logged.
    #[serde(default = "default_context_warn_chars")]
    pub context_warn_chars: usize,
    /// Artifact poll interval in milliseconds; 0 disables polling.
    #[serde(default)]
    pub poll_interval_ms: u64,
    /// Artifacts each task is expected to produce, for poll estimates.
    #[serde(default = "default_artifacts_per_task")]
    pub poll_artifacts_per_task: usize,
}

fn default_revision_enabled() -> bool {
    true
}

fn default_context_warn_chars() -> usize {
    DEFAULT_CONTEXT_WARN_CHARS
}

fn default_artifacts_per_task() -> usize {
    1
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            revise_on_no: false,
            revision_enabled: default_revision_enabled(),
            context_warn_chars: default_context_warn_chars(),
            poll_interval_ms: 0,
            poll_artifacts_per_task: default_artifacts_per_task(),
        }
    }
}

impl RuntimeConfig {
    /// Returns the poll interval, or `None` when polling is off.
    #[must_use]
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }

    /// Default options for submitted runs.
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        RunOptions::default()
            .with_revise_on_no(self.revise_on_no)
            .with_revision_enabled(self.revision_enabled)
    }
}

/// Where run records and artifacts live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process memory; lost on exit.
    #[default]
    Memory,
    /// JSON records and markdown artifacts under `dir`.
    File,
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend kind.
    #[serde(default)]
    pub backend: StoreBackend,
    /// Root directory for the file backend.
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("outputs")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            dir: default_store_dir(),
        }
    }
}

impl StoreConfig {
    /// Directory holding run records for the file backend.
    #[must_use]
    pub fn jobs_dir(&self) -> PathBuf {
        self.dir.join("jobs")
    }

    /// Opens the job store, reconciling records from earlier processes.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if existing records cannot be read.
    pub async fn open_job_store(&self) -> Result<(JobStore, ReconcileReport), GapflowError> {
        match self.backend {
            StoreBackend::Memory => JobStore::open(Arc::new(InMemoryJobBackend::new())).await,
            StoreBackend::File => JobStore::open(Arc::new(FileJobBackend::new(self.jobs_dir()))).await,
        }
    }

    /// Creates the artifact store for this backend.
    #[must_use]
    pub fn artifact_store(&self) -> Arc<dyn ArtifactStore> {
        match self.backend {
            StoreBackend::Memory => Arc::new(InMemoryArtifactStore::new()),
            StoreBackend::File => Arc::new(FileArtifactStore::new(self.dir.clone())),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Line format.
    #[serde(default)]
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "gapflow=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_log_filter(),
        }
    }
}

impl PipelineConfig {
    /// Returns the built-in pipeline.
    ///
    /// # Errors
    ///
    /// Fails only if the embedded file is malformed.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_toml_str(BUILTIN_CONFIG).context("built-in pipeline config is invalid")
    }

    /// Parses a config from TOML text without validating it.
    ///
    /// # Errors
    ///
    /// Returns the TOML parse error.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Builds the task catalog.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for duplicate ids and bad dependencies.
    pub fn catalog(&self) -> Result<TaskCatalog, ConfigError> {
        TaskCatalog::new(self.tasks.iter().cloned())
    }

    /// Tasks of the discovery stage: everything but revision and report tasks.
    #[must_use]
    pub fn discovery_tasks(&self) -> Vec<String> {
        let excluded: BTreeSet<&str> = self
            .stages
            .revision_tasks
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.stages.report_task.as_str()))
            .collect();
        self.tasks
            .iter()
            .filter(|t| !excluded.contains(t.id.as_str()))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Tasks of the revision stage.
    #[must_use]
    pub fn revision_tasks(&self) -> Vec<String> {
        self.stages.revision_tasks.clone()
    }

    /// Tasks of the report stage.
    #[must_use]
    pub fn report_tasks(&self) -> Vec<String> {
        vec![self.stages.report_task.clone()]
    }

    /// Checks task references, stage roles, progress windows and runtime knobs.
    ///
    /// Cycles are detected later, when graphs are built.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let catalog = self.catalog()?;
        let stages = &self.stages;

        for id in stages
            .revision_tasks
            .iter()
            .chain([&stages.gate_task, &stages.report_task])
        {
            if !catalog.contains(id) {
                return Err(ConfigError::UnknownTask { task: id.clone() });
            }
        }
        if stages.revision_tasks.contains(&stages.report_task) {
            return Err(ConfigError::Invalid(format!(
                "report task '{}' cannot also be a revision task",
                stages.report_task
            )));
        }
        if stages.gate_task == stages.report_task || stages.revision_tasks.contains(&stages.gate_task) {
            return Err(ConfigError::Invalid(format!(
                "gate task '{}' must be a discovery task",
                stages.gate_task
            )));
        }
        if !stages.revision_tasks.is_empty() && !stages.revision_tasks.contains(&stages.recheck_task) {
            return Err(ConfigError::Invalid(format!(
                "recheck task '{}' must be one of the revision tasks",
                stages.recheck_task
            )));
        }
        if let Some((seed, _)) = self.revision_inputs.iter().find(|(_, keywords)| keywords.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "revision input '{seed}' has no keywords"
            )));
        }

        self.progress.validate()?;
        if self.runtime.poll_artifacts_per_task == 0 {
            return Err(ConfigError::Invalid(
                "runtime.poll_artifacts_per_task must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Fails if an override value cannot be parsed.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`. Blank values are ignored.
    ///
    /// A store directory override also selects the file backend.
    ///
    /// # Errors
    ///
    /// Fails if an override value cannot be parsed.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GAPFLOW_REVISE_ON_NO") {
            self.runtime.revise_on_no =
                parse_flag(&v).with_context(|| format!("GAPFLOW_REVISE_ON_NO has invalid value '{v}'"))?;
        }
        if let Some(v) = get("GAPFLOW_STORE_DIR") {
            self.store.dir = PathBuf::from(v.trim());
            self.store.backend = StoreBackend::File;
        }
        if let Some(v) = get("GAPFLOW_POLL_INTERVAL_MS") {
            self.runtime.poll_interval_ms = v
                .trim()
                .parse()
                .with_context(|| format!("GAPFLOW_POLL_INTERVAL_MS has invalid value '{v}'"))?;
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got '{other}'"),
    }
}

/// Loads, overrides and validates a config file.
///
/// # Errors
///
/// Fails if the file cannot be read or parsed, or does not validate.
pub fn load_from_path(path: impl AsRef<Path>) -> anyhow::Result<PipelineConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
    let cfg = PipelineConfig::from_toml_str(&text).with_context(|| format!("failed to parse config {}", path.display()))?;
    finish(cfg).with_context(|| format!("invalid config {}", path.display()))
}

/// Loads the first config found in the standard locations.
///
/// # Errors
///
/// Fails if the selected file cannot be loaded or does not validate.
pub fn load_default() -> anyhow::Result<PipelineConfig> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return load_from_path(PathBuf::from(path));
    }
    let local = Path::new(LOCAL_CONFIG_FILE);
    if local.exists() {
        return load_from_path(local);
    }
    finish(PipelineConfig::builtin()?)
}

fn finish(mut cfg: PipelineConfig) -> anyhow::Result<PipelineConfig> {
    cfg.apply_env_overrides()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::StageWindow;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn minimal() -> &'static str {
        r#"
        [[tasks]]
        id = "discover"
        executor = "research"

        [[tasks]]
        id = "gate"
        dependencies = ["discover"]
        executor = "review"

        [[tasks]]
        id = "report"
        dependencies = ["gate"]
        executor = "report"

        [stages]
        gate_task = "gate"
        recheck_task = "gate"
        report_task = "report"
        "#
    }

    #[test]
    fn test_builtin_config_is_valid() {
        let cfg = PipelineConfig::builtin().unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.tasks.len(), 12);
        assert_eq!(cfg.discovery_tasks().len(), 9);
        assert_eq!(cfg.revision_tasks(), vec!["revise_positioning", "red_team_recheck"]);
        assert_eq!(cfg.report_tasks(), vec!["final_step1_report"]);
        assert_eq!(cfg.progress, ProgressWindows::default());
        assert_eq!(cfg.runtime.poll_interval(), None);
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = PipelineConfig::from_toml_str(minimal()).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.discovery_tasks(), vec!["discover", "gate"]);
        assert!(cfg.revision_tasks().is_empty());
        assert!(cfg.runtime.revision_enabled);
        assert_eq!(cfg.runtime.context_warn_chars, DEFAULT_CONTEXT_WARN_CHARS);
        assert_eq!(cfg.logging.filter, "gapflow=info");
        assert_eq!(cfg.store.dir, PathBuf::from("outputs"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let text = minimal().replace(r#"dependencies = ["discover"]"#, r#"dependencies = ["missing"]"#);
        let cfg = PipelineConfig::from_toml_str(&text).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::UnknownDependency { ref dependency, .. }) if dependency == "missing"
        ));
    }

    #[test]
    fn test_missing_stage_task_rejected() {
        let mut cfg = PipelineConfig::from_toml_str(minimal()).unwrap();
        cfg.stages.report_task = "nope".to_string();
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::UnknownTask {
                task: "nope".to_string()
            })
        );
    }

    #[test]
    fn test_recheck_must_be_revision_task() {
        let mut cfg = PipelineConfig::builtin().unwrap();
        cfg.stages.recheck_task = "red_team_review".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let mut cfg = PipelineConfig::builtin().unwrap();
        cfg.progress.revision = StageWindow::new(90, 80);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("GAPFLOW_REVISE_ON_NO", "true"),
            ("GAPFLOW_STORE_DIR", "/tmp/gapflow-out"),
            ("GAPFLOW_POLL_INTERVAL_MS", "250"),
        ]
        .into_iter()
        .collect();
        let mut cfg = PipelineConfig::builtin().unwrap();
        cfg.apply_overrides(|k| env.get(k).map(|v| (*v).to_string())).unwrap();

        assert!(cfg.runtime.revise_on_no);
        assert!(cfg.runtime.run_options().revise_on_no);
        assert_eq!(cfg.store.backend, StoreBackend::File);
        assert_eq!(cfg.store.dir, PathBuf::from("/tmp/gapflow-out"));
        assert_eq!(cfg.runtime.poll_interval(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_bad_override_is_an_error() {
        let mut cfg = PipelineConfig::builtin().unwrap();
        let err = cfg
            .apply_overrides(|k| (k == "GAPFLOW_POLL_INTERVAL_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("GAPFLOW_POLL_INTERVAL_MS"));
    }

    #[test]
    fn test_load_from_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pipeline.toml");
        std::fs::write(&path, minimal()).unwrap();

        let cfg = load_from_path(&path).unwrap();
        assert_eq!(cfg.tasks.len(), 3);

        std::fs::write(&path, "tasks = 3").unwrap();
        let err = load_from_path(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config"));
    }
}
