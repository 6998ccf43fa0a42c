//! In-memory job backend.

use super::JobBackend;
use crate::core::PipelineRun;
use crate::errors::PersistenceError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Keeps run records in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryJobBackend {
    records: RwLock<HashMap<String, PipelineRun>>,
}

impl InMemoryJobBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with records.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = PipelineRun>) -> Self {
        let records = records.into_iter().map(|r| (r.run_id.clone(), r)).collect();
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl JobBackend for InMemoryJobBackend {
    async fn put(&self, record: &PipelineRun) -> Result<(), PersistenceError> {
        self.records.write().insert(record.run_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<PipelineRun>, PersistenceError> {
        Ok(self.records.read().get(run_id).cloned())
    }

    async fn list(&self) -> Result<Vec<PipelineRun>, PersistenceError> {
        Ok(self.records.read().values().cloned().collect())
    }

    async fn remove(&self, run_id: &str) -> Result<bool, PersistenceError> {
        Ok(self.records.write().remove(run_id).is_some())
    }
}
