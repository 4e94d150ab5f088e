use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

/// Coarse classification used by callers that translate errors into
/// transport codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller sent something malformed. Not retried.
    Validation,
    /// Unknown job, dataset, model or artifact.
    NotFound,
    /// The object store timed out or failed.
    StorageUnavailable,
    /// Anything that went wrong inside a running job.
    TrainingFailure,
}

/// Structural problems with a tabular dataset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatasetError {
    #[error("dataset is empty")]
    EmptyDataset,

    #[error("dataset must have at least one feature column and one target column")]
    InsufficientColumns,

    #[error("malformed dataset: {0}")]
    MalformedDataset(String),

    #[error("validation_split must be in [0.0, 1.0), got {0}")]
    InvalidSplit(String),

    #[error("validation_split is too large; no training samples remain")]
    NoTrainingSamples,
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid training job config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("invalid state transition for job {job_id}: {detail}")]
    InvalidTransition { job_id: String, detail: String },

    #[error("trainer error: {0}")]
    Trainer(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) | Self::Dataset(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Self::InvalidTransition { .. } | Self::Trainer(_) | Self::Json(_) | Self::Other(_) => {
                ErrorKind::TrainingFailure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_errors_are_validation() {
        let err: TrainingError = DatasetError::InsufficientColumns.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("at least one feature column and one target column"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(TrainingError::NotFound("job_x".to_string()).kind(), ErrorKind::NotFound);
        assert_eq!(
            TrainingError::StorageUnavailable("timeout".to_string()).kind(),
            ErrorKind::StorageUnavailable
        );
        assert_eq!(TrainingError::Trainer("boom".to_string()).kind(), ErrorKind::TrainingFailure);
    }
}
