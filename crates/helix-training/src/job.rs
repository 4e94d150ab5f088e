use crate::artifacts::ArtifactLocator;
use crate::error::{TrainingError, TrainingResult};
use crate::metrics::EpochMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for a training job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    #[must_use]
    pub fn new() -> Self {
        Self(format!("job_{}", Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Configuration submitted with a training request. Immutable once a job
/// has been created from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Locator of the dataset in the object store.
    pub dataset_ref: String,
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_validation_split")]
    pub validation_split: f64,
    #[serde(default)]
    pub gpu_enabled: bool,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_hidden_size")]
    pub hidden_size: u32,
    /// Fixes weight initialization and batch shuffling when set.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_epochs() -> u32 {
    100
}

fn default_batch_size() -> u32 {
    32
}

fn default_validation_split() -> f64 {
    0.2
}

fn default_learning_rate() -> f64 {
    0.001
}

fn default_hidden_size() -> u32 {
    64
}

impl JobConfig {
    #[must_use]
    pub fn new(dataset_ref: impl Into<String>) -> Self {
        Self {
            dataset_ref: dataset_ref.into(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            validation_split: default_validation_split(),
            gpu_enabled: false,
            learning_rate: default_learning_rate(),
            hidden_size: default_hidden_size(),
            seed: None,
        }
    }

    /// Well-formedness only. Dataset contents and the validation split are
    /// checked by the training loop once the job runs.
    pub fn validate(&self) -> TrainingResult<()> {
        if self.dataset_ref.trim().is_empty() {
            return Err(TrainingError::InvalidConfig("dataset_ref is required".to_string()));
        }
        if self.epochs == 0 {
            return Err(TrainingError::InvalidConfig("epochs must be >= 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidConfig("batch_size must be >= 1".to_string()));
        }
        if self.hidden_size == 0 {
            return Err(TrainingError::InvalidConfig("hidden_size must be >= 1".to_string()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidConfig("learning_rate must be > 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Transitions only move forward; nothing leaves a terminal state.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running | Self::Failed)
                | (Self::Running, Self::Running | Self::Completed | Self::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a job's progress. Always replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub current_epoch: u32,
    pub total_epochs: u32,
    /// Whole percent, `current_epoch * 100 / total_epochs`.
    #[serde(rename = "progress")]
    pub percent_complete: u8,
    pub metrics: EpochMetrics,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn initial(total_epochs: u32) -> Self {
        Self { current_epoch: 0, total_epochs, percent_complete: 0, metrics: EpochMetrics::default() }
    }

    #[must_use]
    pub fn for_epoch(epoch: u32, total_epochs: u32, metrics: EpochMetrics) -> Self {
        let percent = if total_epochs == 0 {
            0
        } else {
            (u64::from(epoch.min(total_epochs)) * 100 / u64::from(total_epochs)) as u8
        };
        Self { current_epoch: epoch, total_epochs, percent_complete: percent, metrics: metrics.rounded() }
    }
}

/// The full state of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub config: JobConfig,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: ProgressSnapshot,
    pub artifact_location: Option<ArtifactLocator>,
    pub error: Option<String>,
}

impl JobRecord {
    #[must_use]
    pub fn new(id: JobId, config: JobConfig) -> Self {
        let progress = ProgressSnapshot::initial(config.epochs);
        Self {
            id,
            status: JobStatus::Pending,
            config,
            started_at: Utc::now(),
            completed_at: None,
            progress,
            artifact_location: None,
            error: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> TrainingResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(TrainingError::InvalidTransition {
                job_id: self.id.to_string(),
                detail: format!("{} -> {}", self.status, to),
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn mark_running(&mut self) -> TrainingResult<()> {
        self.transition(JobStatus::Running)
    }

    /// Replace the progress snapshot. Epochs may never go backwards or past
    /// the configured total.
    pub fn publish_progress(&mut self, snapshot: ProgressSnapshot) -> TrainingResult<()> {
        if self.status != JobStatus::Running {
            return Err(TrainingError::InvalidTransition {
                job_id: self.id.to_string(),
                detail: format!("cannot publish progress while {}", self.status),
            });
        }
        if snapshot.current_epoch < self.progress.current_epoch
            || snapshot.current_epoch > self.progress.total_epochs
            || snapshot.total_epochs != self.progress.total_epochs
        {
            return Err(TrainingError::InvalidTransition {
                job_id: self.id.to_string(),
                detail: format!(
                    "epoch {}/{} after {}/{}",
                    snapshot.current_epoch,
                    snapshot.total_epochs,
                    self.progress.current_epoch,
                    self.progress.total_epochs
                ),
            });
        }
        self.progress = snapshot;
        Ok(())
    }

    pub fn complete(&mut self, location: ArtifactLocator) -> TrainingResult<()> {
        self.transition(JobStatus::Completed)?;
        self.artifact_location = Some(location);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> TrainingResult<()> {
        self.transition(JobStatus::Failed)?;
        let message = message.into();
        self.error = Some(if message.trim().is_empty() { "unknown error".to_string() } else { message });
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// What `submit` hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// Status plus the latest snapshot, as served to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(flatten)]
    pub progress: ProgressSnapshot,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub artifact_location: Option<ArtifactLocator>,
    pub error: Option<String>,
}

impl From<&JobRecord> for JobProgress {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.clone(),
            status: record.status,
            progress: record.progress,
            started_at: record.started_at,
            completed_at: record.completed_at,
            artifact_location: record.artifact_location.clone(),
            error: record.error.clone(),
        }
    }
}

/// One line of the job listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub progress: ProgressSnapshot,
}

impl From<&JobRecord> for JobSummary {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id.clone(),
            status: record.status,
            started_at: record.started_at,
            progress: record.progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_record(epochs: u32) -> JobRecord {
        let mut config = JobConfig::new("memory://datasets/d.csv");
        config.epochs = epochs;
        let mut record = JobRecord::new(JobId::new(), config);
        record.mark_running().unwrap();
        record
    }

    #[test]
    fn test_config_validate() {
        assert!(JobConfig::new("memory://x").validate().is_ok());
        assert!(JobConfig::new("  ").validate().is_err());

        let mut config = JobConfig::new("memory://x");
        config.epochs = 0;
        assert!(config.validate().is_err());

        let mut config = JobConfig::new("memory://x");
        config.learning_rate = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_wire_defaults() {
        let config: JobConfig = serde_json::from_str(r#"{"dataset_ref": "local://d.csv"}"#).unwrap();
        assert_eq!(config.epochs, 100);
        assert_eq!(config.batch_size, 32);
        assert!((config.validation_split - 0.2).abs() < f64::EPSILON);
        assert!(!config.gpu_enabled);
        assert!((config.learning_rate - 0.001).abs() < f64::EPSILON);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("job_"));
    }

    #[test]
    fn test_progress_must_not_go_backwards() {
        let mut record = running_record(3);
        record.publish_progress(ProgressSnapshot::for_epoch(2, 3, EpochMetrics::default())).unwrap();
        assert!(record.publish_progress(ProgressSnapshot::for_epoch(1, 3, EpochMetrics::default())).is_err());
        assert!(record.publish_progress(ProgressSnapshot::for_epoch(4, 3, EpochMetrics::default())).is_err());
        assert_eq!(record.progress.current_epoch, 2);
        assert_eq!(record.progress.percent_complete, 66);
    }

    #[test]
    fn test_terminal_fields_are_exclusive() {
        let mut record = running_record(1);
        record.complete(ArtifactLocator("memory://models/a.json".to_string())).unwrap();
        assert!(record.fail("late failure").is_err());
        assert!(record.error.is_none());
        assert!(record.completed_at.is_some());

        let mut record = running_record(1);
        record.fail("boom").unwrap();
        assert!(record.complete(ArtifactLocator("memory://x".to_string())).is_err());
        assert!(record.artifact_location.is_none());
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_no_progress_after_terminal() {
        let mut record = running_record(2);
        record.fail("boom").unwrap();
        assert!(record.publish_progress(ProgressSnapshot::for_epoch(1, 2, EpochMetrics::default())).is_err());
    }

    #[test]
    fn test_progress_serializes_flat() {
        let record = running_record(5);
        let json = serde_json::to_value(JobProgress::from(&record)).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["current_epoch"], 0);
        assert_eq!(json["total_epochs"], 5);
        assert_eq!(json["progress"], 0);
        assert!(json["metrics"]["val_mse"].is_null());
    }
}
