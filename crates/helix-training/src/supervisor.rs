//! Entry point for submitting and observing training jobs.

use crate::driver::TrainingDriver;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{JobConfig, JobId, JobProgress, JobRecord, JobStatus, JobSummary, JobTicket};
use crate::registry::JobRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

/// Owns the task handle of every job it spawned.
///
/// Jobs run on their own tokio task with no concurrency cap and no
/// cancellation. A finished handle is dropped lazily on the next submit.
pub struct JobSupervisor {
    driver: Arc<TrainingDriver>,
    handles: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl std::fmt::Debug for JobSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSupervisor").field("driver", &self.driver).finish_non_exhaustive()
    }
}

impl JobSupervisor {
    #[must_use]
    pub fn new(driver: TrainingDriver) -> Self {
        Self { driver: Arc::new(driver), handles: Mutex::new(HashMap::new()) }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<JobRegistry> {
        self.driver.registry()
    }

    /// Create a job and start it in the background.
    ///
    /// Only well-formedness is checked here; problems with the dataset or the
    /// split surface later as a `Failed` job.
    ///
    /// # Errors
    /// `InvalidConfig` if the config is malformed.
    pub async fn submit(&self, config: JobConfig) -> TrainingResult<JobTicket> {
        config.validate()?;

        let job_id = JobId::new();
        let registry = self.registry();
        registry.create(job_id.clone(), config.clone()).await?;
        registry.update(&job_id, JobRecord::mark_running).await?;

        let span = info_span!("training_job", job_id = %job_id);
        let driver = Arc::clone(&self.driver);
        let task_id = job_id.clone();
        let epochs = config.epochs;
        let handle = tokio::spawn(async move { driver.run(task_id, config).await }.instrument(span));

        let mut handles = self.handles.lock().await;
        handles.retain(|_, handle| !handle.is_finished());
        handles.insert(job_id.clone(), handle);
        drop(handles);

        info!(job_id = %job_id, epochs, "Job submitted");
        Ok(JobTicket { job_id, status: JobStatus::Running })
    }

    pub async fn progress(&self, job_id: &JobId) -> TrainingResult<JobProgress> {
        let record = self.registry().get(job_id).await?;
        Ok(JobProgress::from(&record))
    }

    /// Every known job, oldest first.
    pub async fn list_jobs(&self) -> Vec<JobSummary> {
        let mut records = self.registry().list_all().await;
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.as_str().cmp(b.id.as_str())));
        records.iter().map(JobSummary::from).collect()
    }

    /// Wait for one job's task to end and return its final record.
    ///
    /// # Errors
    /// `NotFound` if the job is unknown.
    pub async fn join(&self, job_id: &JobId) -> TrainingResult<JobRecord> {
        let handle = self.handles.lock().await.remove(job_id);
        if let Some(handle) = handle {
            handle.await.map_err(|e| TrainingError::Trainer(format!("job task aborted: {e}")))?;
        }
        self.registry().get(job_id).await
    }

    /// Number of job tasks that have not finished yet.
    pub async fn active_jobs(&self) -> usize {
        self.handles.lock().await.values().filter(|handle| !handle.is_finished()).count()
    }

    /// Wait for every in-flight job.
    pub async fn shutdown(&self) {
        let handles: Vec<(JobId, JoinHandle<()>)> = self.handles.lock().await.drain().collect();
        if !handles.is_empty() {
            info!(count = handles.len(), "Waiting for in-flight jobs");
        }
        for (job_id, handle) in handles {
            if let Err(e) = handle.await {
                warn!(job_id = %job_id, error = %e, "Job task ended abnormally");
            }
        }
    }
}
