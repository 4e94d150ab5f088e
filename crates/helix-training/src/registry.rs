//! In-memory store of job records.
//!
//! Each record sits behind its own lock. The map lock is only taken to find
//! or insert a record, so a job publishing progress never blocks readers of
//! another job.

use crate::error::{TrainingError, TrainingResult};
use crate::job::{JobConfig, JobId, JobRecord};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

type RecordSlot = Arc<RwLock<JobRecord>>;

#[derive(Default)]
pub struct JobRegistry {
    records: RwLock<HashMap<JobId, RecordSlot>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_count", &self.records.try_read().map(|r| r.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new `Pending` record.
    ///
    /// # Errors
    /// Fails if a record with the same id already exists.
    pub async fn create(&self, id: JobId, config: JobConfig) -> TrainingResult<JobRecord> {
        let mut records = self.records.write().await;
        if records.contains_key(&id) {
            return Err(TrainingError::InvalidConfig(format!("job id already registered: {id}")));
        }
        let record = JobRecord::new(id.clone(), config);
        records.insert(id.clone(), Arc::new(RwLock::new(record.clone())));
        debug!(job_id = %id, "Registered job");
        Ok(record)
    }

    async fn slot(&self, id: &JobId) -> TrainingResult<RecordSlot> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| TrainingError::NotFound(format!("job not found: {id}")))
    }

    /// Apply `mutation` to one record atomically.
    ///
    /// The mutation runs against a copy; the copy replaces the stored record
    /// only when the mutation succeeds, so readers see either the old record
    /// or the fully updated one.
    pub async fn update<T, F>(&self, id: &JobId, mutation: F) -> TrainingResult<T>
    where
        F: FnOnce(&mut JobRecord) -> TrainingResult<T>,
    {
        let slot = self.slot(id).await?;
        let mut guard = slot.write().await;
        let mut working = guard.clone();
        let out = mutation(&mut working)?;
        *guard = working;
        Ok(out)
    }

    pub async fn get(&self, id: &JobId) -> TrainingResult<JobRecord> {
        let slot = self.slot(id).await?;
        let record = slot.read().await.clone();
        Ok(record)
    }

    /// Snapshot of every record. Order is unspecified.
    pub async fn list_all(&self) -> Vec<JobRecord> {
        let slots: Vec<RecordSlot> = self.records.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(slot.read().await.clone());
        }
        out
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
