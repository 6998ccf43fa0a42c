//! Run record persistence.
//!
//! [`JobStore`] writes a [`PipelineRun`] through to its backend after every
//! mutation and serializes writers per run id. Opening a store reconciles
//! records left non-terminal by a previous process: those runs are marked
//! FAILED, since in-flight runs are never resumed.

mod file;
mod memory;

pub use file::FileJobBackend;
pub(crate) use file::write_atomic;
pub use memory::InMemoryJobBackend;

use crate::core::PipelineRun;
use crate::errors::{GapflowError, PersistenceError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Storage backend for run records.
///
/// `put` must replace the whole record so readers see consistent snapshots.
#[async_trait]
pub trait JobBackend: Send + Sync + Debug {
    /// Inserts or replaces a record.
    async fn put(&self, record: &PipelineRun) -> Result<(), PersistenceError>;

    /// Loads a record.
    async fn get(&self, run_id: &str) -> Result<Option<PipelineRun>, PersistenceError>;

    /// Loads every record, in no particular order.
    async fn list(&self) -> Result<Vec<PipelineRun>, PersistenceError>;

    /// Deletes a record, returning whether it existed.
    async fn remove(&self, run_id: &str) -> Result<bool, PersistenceError>;
}

/// Outcome of startup reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records examined.
    pub scanned: usize,
    /// Runs forced to FAILED.
    pub interrupted: Vec<String>,
}

/// Persists run records with per-run write serialization.
#[derive(Debug)]
pub struct JobStore {
    backend: Arc<dyn JobBackend>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl JobStore {
    /// Creates a store without reconciling existing records.
    #[must_use]
    pub fn new(backend: Arc<dyn JobBackend>) -> Self {
        Self {
            backend,
            locks: DashMap::new(),
        }
    }

    /// Creates a store over a fresh in-memory backend.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryJobBackend::new()))
    }

    /// Creates a store and reconciles records left by a previous process.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the records cannot be listed or rewritten.
    pub async fn open(backend: Arc<dyn JobBackend>) -> Result<(Self, ReconcileReport), GapflowError> {
        let store = Self::new(backend);
        let report = store.reconcile().await?;
        Ok((store, report))
    }

    fn lock_for(&self, run_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(run_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// Returns `GapflowError::Persistence` if the backend write fails.
    pub async fn put(&self, record: &PipelineRun) -> Result<(), GapflowError> {
        let lock = self.lock_for(&record.run_id);
        let _guard = lock.lock().await;
        self.backend.put(record).await?;
        Ok(())
    }

    /// Loads a record.
    ///
    /// # Errors
    ///
    /// Returns `GapflowError::Persistence` if the backend read fails.
    pub async fn get(&self, run_id: &str) -> Result<Option<PipelineRun>, GapflowError> {
        Ok(self.backend.get(run_id).await?)
    }

    /// Returns up to `limit` records, newest first.
    ///
    /// # Errors
    ///
    /// Returns `GapflowError::Persistence` if the backend read fails.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<PipelineRun>, GapflowError> {
        let mut records = self.backend.list().await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.run_id.cmp(&b.run_id)));
        records.truncate(limit);
        Ok(records)
    }

    /// Read-modify-write of one record under its lock.
    ///
    /// The record is written back only if `f` succeeds.
    ///
    /// # Errors
    ///
    /// Returns `RunNotFound` for unknown ids, any error from `f`, or a
    /// persistence error from the backend.
    pub async fn update<T, F>(&self, run_id: &str, f: F) -> Result<T, GapflowError>
    where
        F: FnOnce(&mut PipelineRun) -> Result<T, GapflowError> + Send,
        T: Send,
    {
        let lock = self.lock_for(run_id);
        let _guard = lock.lock().await;
        let mut record = self
            .backend
            .get(run_id)
            .await?
            .ok_or_else(|| GapflowError::RunNotFound(run_id.to_string()))?;
        let out = f(&mut record)?;
        self.backend.put(&record).await?;
        Ok(out)
    }

    /// Deletes a record, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `GapflowError::Persistence` if the backend delete fails.
    pub async fn purge(&self, run_id: &str) -> Result<bool, GapflowError> {
        let lock = self.lock_for(run_id);
        let removed = {
            let _guard = lock.lock().await;
            self.backend.remove(run_id).await?
        };
        self.locks.remove(run_id);
        Ok(removed)
    }

    /// Marks every non-terminal record FAILED with a restart message.
    ///
    /// # Errors
    ///
    /// Returns `GapflowError::Persistence` if records cannot be listed.
    /// Individual rewrite failures are logged and skipped.
    pub async fn reconcile(&self) -> Result<ReconcileReport, GapflowError> {
        let records = self.backend.list().await?;
        let mut report = ReconcileReport {
            scanned: records.len(),
            interrupted: Vec::new(),
        };

        for record in records.into_iter().filter(|r| !r.is_terminal()) {
            let result = self
                .update(&record.run_id, |r| {
                    if r.is_terminal() {
                        return Ok(false);
                    }
                    r.fail(GapflowError::RestartInterrupted.to_string())?;
                    Ok(true)
                })
                .await;
            match result {
                Ok(true) => {
                    warn!(run_id = %record.run_id, stage = %record.stage, "Run interrupted by restart; marked FAILED");
                    report.interrupted.push(record.run_id);
                }
                Ok(false) => {}
                Err(e) => warn!(run_id = %record.run_id, error = %e, "Failed to reconcile run record"),
            }
        }

        report.interrupted.sort();
        info!(
            scanned = report.scanned,
            interrupted = report.interrupted.len(),
            "Job store reconciled"
        );
        Ok(report)
    }

    /// Returns whether the run is terminal, or `None` if it has no record.
    ///
    /// # Errors
    ///
    /// Returns `GapflowError::Persistence` if the backend read fails.
    pub async fn is_terminal(&self, run_id: &str) -> Result<Option<bool>, GapflowError> {
        Ok(self.get(run_id).await?.map(|r| r.is_terminal()))
    }
}
