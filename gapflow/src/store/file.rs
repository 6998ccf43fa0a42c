//! JSON-file-per-run job backend.

use super::JobBackend;
use crate::core::PipelineRun;
use crate::errors::PersistenceError;
use crate::utils::sanitize_file_component;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Writes `content` to `path` through a sibling temp file and a rename, so
/// readers never observe a partially written file.
pub(crate) async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), PersistenceError> {
    let op = || format!("write {}", path.display());
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PersistenceError::io(op(), &e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| PersistenceError::io(op(), &e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| PersistenceError::io(op(), &e))
}

/// Stores each run as `<dir>/<run_id>.json`.
#[derive(Debug, Clone)]
pub struct FileJobBackend {
    dir: PathBuf,
}

impl FileJobBackend {
    /// Creates a backend over `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the backing directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_file_component(run_id)))
    }
}

fn decode(path: &Path, text: &str) -> Result<PipelineRun, PersistenceError> {
    serde_json::from_str(text).map_err(|e| PersistenceError::new(format!("decode {}", path.display()), e.to_string()))
}

#[async_trait]
impl JobBackend for FileJobBackend {
    async fn put(&self, record: &PipelineRun) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| PersistenceError::new(format!("encode {}", record.run_id), e.to_string()))?;
        write_atomic(&self.path_for(&record.run_id), &json).await
    }

    async fn get(&self, run_id: &str) -> Result<Option<PipelineRun>, PersistenceError> {
        let path = self.path_for(run_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => decode(&path, &text).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::io(format!("read {}", path.display()), &e)),
        }
    }

    async fn list(&self) -> Result<Vec<PipelineRun>, PersistenceError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(format!("list {}", self.dir.display()), &e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(format!("list {}", self.dir.display()), &e))?
        {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable run record");
                    continue;
                }
            };
            match decode(&path, &text) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping corrupt run record"),
            }
        }
        Ok(records)
    }

    async fn remove(&self, run_id: &str) -> Result<bool, PersistenceError> {
        let path = self.path_for(run_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PersistenceError::io(format!("remove {}", path.display()), &e)),
        }
    }
}
