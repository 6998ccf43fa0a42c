//! Per-task artifact persistence.
//!
//! Every task output is saved as an artifact under its run and stage so the
//! revision stage can be seeded from discovery results and partial work
//! survives a failed stage.

use crate::errors::PersistenceError;
use crate::store::write_atomic;
use crate::utils::sanitize_file_component;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Stage folder used for precheck rejection artifacts.
pub const PRECHECK_STAGE: &str = "precheck";

/// One saved task output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    /// Producing task id.
    pub task_id: String,
    /// Raw output text.
    pub content: String,
}

/// Storage for task outputs, grouped by run and stage.
#[async_trait]
pub trait ArtifactStore: Send + Sync + Debug {
    /// Saves (or replaces) the output of `task_id`.
    ///
    /// # Errors
    ///
    /// Returns a `PersistenceError` if the write fails.
    async fn save(&self, run_id: &str, stage: &str, task_id: &str, content: &str) -> Result<(), PersistenceError>;

    /// Loads every artifact of a stage in save order.
    ///
    /// A stage with no artifacts yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns a `PersistenceError` if stored data cannot be read.
    async fn load_stage(&self, run_id: &str, stage: &str) -> Result<Vec<StoredArtifact>, PersistenceError>;

    /// Finds the artifact whose task id matches `keyword`.
    ///
    /// An exact id match wins; otherwise the first artifact (in save order)
    /// whose id contains the keyword, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns a `PersistenceError` if stored data cannot be read.
    async fn find_by_keyword(&self, run_id: &str, stage: &str, keyword: &str) -> Result<Option<String>, PersistenceError> {
        let artifacts = self.load_stage(run_id, stage).await?;
        Ok(match_keyword(&artifacts, keyword).map(|a| a.content.clone()))
    }

    /// Counts the artifacts currently present for a stage.
    async fn count(&self, run_id: &str, stage: &str) -> usize {
        self.load_stage(run_id, stage).await.map_or(0, |a| a.len())
    }
}

fn match_keyword<'a>(artifacts: &'a [StoredArtifact], keyword: &str) -> Option<&'a StoredArtifact> {
    let needle = keyword.to_lowercase();
    artifacts
        .iter()
        .find(|a| a.task_id.to_lowercase() == needle)
        .or_else(|| artifacts.iter().find(|a| a.task_id.to_lowercase().contains(&needle)))
}

/// Artifact store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    stages: RwLock<HashMap<(String, String), Vec<StoredArtifact>>>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn save(&self, run_id: &str, stage: &str, task_id: &str, content: &str) -> Result<(), PersistenceError> {
        let mut stages = self.stages.write();
        let list = stages
            .entry((run_id.to_string(), stage.to_string()))
            .or_default();
        match list.iter_mut().find(|a| a.task_id == task_id) {
            Some(existing) => existing.content = content.to_string(),
            None => list.push(StoredArtifact {
                task_id: task_id.to_string(),
                content: content.to_string(),
            }),
        }
        Ok(())
    }

    async fn load_stage(&self, run_id: &str, stage: &str) -> Result<Vec<StoredArtifact>, PersistenceError> {
        Ok(self
            .stages
            .read()
            .get(&(run_id.to_string(), stage.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StageIndex {
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    task_id: String,
    file: String,
}

const INDEX_FILE: &str = "_index.json";

/// Artifact store writing one markdown file per task.
///
/// Layout: `<root>/runs/<run_id>/<stage>/NN_<task_id>.md` with an
/// `_index.json` listing task ids in save order. Writers to the same stage
/// folder are serialized; different runs and stages write independently.
#[derive(Debug)]
pub struct FileArtifactStore {
    root: PathBuf,
    stage_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl FileArtifactStore {
    /// Creates a store rooted at `root`. Directories are created on demand.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stage_locks: DashMap::new(),
        }
    }

    /// Returns the directory holding one stage's artifacts.
    #[must_use]
    pub fn stage_dir(&self, run_id: &str, stage: &str) -> PathBuf {
        self.root
            .join("runs")
            .join(sanitize_file_component(run_id))
            .join(sanitize_file_component(stage))
    }

    fn lock_for(&self, dir: &Path) -> Arc<Mutex<()>> {
        Arc::clone(
            self.stage_locks
                .entry(dir.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    async fn read_index(dir: &Path) -> Result<StageIndex, PersistenceError> {
        let path = dir.join(INDEX_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| PersistenceError::new(format!("read {}", path.display()), e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StageIndex::default()),
            Err(e) => Err(PersistenceError::io(format!("read {}", path.display()), &e)),
        }
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn save(&self, run_id: &str, stage: &str, task_id: &str, content: &str) -> Result<(), PersistenceError> {
        let dir = self.stage_dir(run_id, stage);
        let lock = self.lock_for(&dir);
        let _guard = lock.lock().await;
        let mut index = Self::read_index(&dir).await?;

        let file = match index.entries.iter().find(|e| e.task_id == task_id) {
            Some(entry) => entry.file.clone(),
            None => {
                let file = format!(
                    "{:02}_{}.md",
                    index.entries.len() + 1,
                    sanitize_file_component(task_id)
                );
                index.entries.push(IndexEntry {
                    task_id: task_id.to_string(),
                    file: file.clone(),
                });
                file
            }
        };

        write_atomic(&dir.join(&file), content.as_bytes()).await?;
        let index_json = serde_json::to_vec_pretty(&index)
            .map_err(|e| PersistenceError::new(format!("encode index for {run_id}/{stage}"), e.to_string()))?;
        write_atomic(&dir.join(INDEX_FILE), &index_json).await
    }

    async fn load_stage(&self, run_id: &str, stage: &str) -> Result<Vec<StoredArtifact>, PersistenceError> {
        let dir = self.stage_dir(run_id, stage);
        let index = Self::read_index(&dir).await?;
        let mut artifacts = Vec::with_capacity(index.entries.len());
        for entry in index.entries {
            let path = dir.join(&entry.file);
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| PersistenceError::io(format!("read {}", path.display()), &e))?;
            artifacts.push(StoredArtifact {
                task_id: entry.task_id,
                content,
            });
        }
        Ok(artifacts)
    }

    /// Counts `.md` files in the stage folder, including ones written by
    /// other processes.
    async fn count(&self, run_id: &str, stage: &str) -> usize {
        let Ok(mut entries) = tokio::fs::read_dir(self.stage_dir(run_id, stage)).await else {
            return 0;
        };
        let mut count = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().extension().is_some_and(|ext| ext == "md") {
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_in_memory_save_and_load_in_order() {
        let store = InMemoryArtifactStore::new();
        store.save("r", "discovery", "b_task", "B").await.unwrap();
        store.save("r", "discovery", "a_task", "A").await.unwrap();
        store.save("r", "discovery", "b_task", "B2").await.unwrap();

        let loaded = store.load_stage("r", "discovery").await.unwrap();
        let ids: Vec<_> = loaded.iter().map(|a| a.task_id.as_str()).collect();
        assert_eq!(ids, vec!["b_task", "a_task"]);
        assert_eq!(loaded[0].content, "B2");
        assert_eq!(store.count("r", "discovery").await, 2);
        assert!(store.load_stage("r", "report").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_keyword_prefers_exact_match() {
        let store = InMemoryArtifactStore::new();
        store.save("r", "discovery", "summarize_channels_vp", "channels").await.unwrap();
        store.save("r", "discovery", "summarize_research", "research").await.unwrap();
        store.save("r", "discovery", "summarize", "exact").await.unwrap();

        let found = store.find_by_keyword("r", "discovery", "summarize").await.unwrap();
        assert_eq!(found.as_deref(), Some("exact"));
    }

    #[tokio::test]
    async fn test_find_by_keyword_substring_and_case() {
        let store = InMemoryArtifactStore::new();
        store.save("r", "discovery", "create_pov_and_positioning", "pov").await.unwrap();
        store.save("r", "discovery", "red_team_review", "review").await.unwrap();

        assert_eq!(
            store.find_by_keyword("r", "discovery", "RED_TEAM").await.unwrap().as_deref(),
            Some("review")
        );
        assert_eq!(store.find_by_keyword("r", "discovery", "gap").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(tmp.path());
        store.save("run-1", "discovery", "discover_competitors", "one").await.unwrap();
        store.save("run-1", "discovery", "compact_competitors", "two").await.unwrap();

        let dir = tmp.path().join("runs").join("run-1").join("discovery");
        assert!(dir.join("01_discover_competitors.md").exists());
        assert!(dir.join("02_compact_competitors.md").exists());
        assert!(dir.join("_index.json").exists());
        assert_eq!(store.count("run-1", "discovery").await, 2);

        let loaded = store.load_stage("run-1", "discovery").await.unwrap();
        assert_eq!(loaded[1].content, "two");
    }

    #[tokio::test]
    async fn test_file_store_overwrite_keeps_number() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(tmp.path());
        store.save("r", "revision", "revise", "v1").await.unwrap();
        store.save("r", "revision", "revise", "v2").await.unwrap();

        let loaded = store.load_stage("r", "revision").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "v2");
        assert_eq!(store.count("r", "revision").await, 1);
    }

    #[tokio::test]
    async fn test_file_store_missing_stage_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(tmp.path());
        assert!(store.load_stage("nope", "discovery").await.unwrap().is_empty());
        assert_eq!(store.count("nope", "discovery").await, 0);
    }

    #[tokio::test]
    async fn test_file_store_locks_per_stage_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(tmp.path());
        let held = store.lock_for(&store.stage_dir("run-a", "discovery"));
        let _guard = held.lock().await;

        let other_run = store.save("run-b", "discovery", "task", "b");
        tokio::time::timeout(std::time::Duration::from_secs(5), other_run)
            .await
            .unwrap()
            .unwrap();

        let same_stage = store.save("run-a", "discovery", "task", "a");
        assert!(tokio::time::timeout(std::time::Duration::from_millis(50), same_stage)
            .await
            .is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_store_concurrent_saves_keep_index() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileArtifactStore::new(tmp.path()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.save("r", "discovery", &format!("task_{i}"), "x").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let loaded = store.load_stage("r", "discovery").await.unwrap();
        assert_eq!(loaded.len(), 8);
        assert_eq!(store.count("r", "discovery").await, 8);
    }
}
