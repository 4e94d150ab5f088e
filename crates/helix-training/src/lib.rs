//! Helix Training
//!
//! Asynchronous training-job orchestration for tabular regression:
//! - Submitting jobs and polling their progress (`JobSupervisor`)
//! - Running the epoch loop with per-epoch metrics (`TrainingDriver`)
//! - Storing datasets and trained parameters (`ArtifactStore`)
//! - Describing untrained model graphs (`ModelBlueprint`)

pub mod architecture;
pub mod artifacts;
pub mod dataset;
pub mod driver;
pub mod error;
pub mod job;
pub mod layout;
pub mod metrics;
pub mod model;
pub mod progress;
pub mod registry;
pub mod supervisor;

pub use architecture::{Activation, BlueprintMetrics, BlueprintRequest, LayerSpec, ModelBlueprint, ModelKind, OptimizerKind};
pub use artifacts::{ArtifactLocator, ArtifactStore, InMemoryObjectStore, LocalObjectStore, ObjectStore};
pub use dataset::{content_digest, inspect, DatasetSummary, PreparedDataset};
pub use driver::TrainingDriver;
pub use error::{DatasetError, ErrorKind, TrainingError, TrainingResult};
pub use job::{JobConfig, JobId, JobProgress, JobRecord, JobStatus, JobSummary, JobTicket, ProgressSnapshot};
pub use layout::StorageLayout;
pub use metrics::EpochMetrics;
pub use model::{
    adam_regressor, load_checkpoint, ComputeDevice, Mlp, MlpCheckpoint, MlpFactory, MlpRegressor, ModelFactory, ModelInit,
    StepOutput, TrainableModel,
};
pub use progress::{ProgressEvent, ProgressSink, TracingProgressSink};
pub use registry::JobRegistry;
pub use supervisor::JobSupervisor;
