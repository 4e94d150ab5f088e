use crate::artifacts::ArtifactLocator;
use crate::job::JobId;
use crate::metrics::EpochMetrics;
use crate::model::ComputeDevice;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Lifecycle notifications emitted by the training loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { job_id: JobId, device: ComputeDevice, train_rows: usize, validation_rows: usize },
    Epoch { job_id: JobId, epoch: u32, total: u32, metrics: EpochMetrics },
    Finished { job_id: JobId, artifact: ArtifactLocator },
    Failed { job_id: JobId, error: String },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Writes every event to the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { job_id, device, train_rows, validation_rows } => {
                info!(%job_id, ?device, train_rows, validation_rows, "Training started");
            }
            ProgressEvent::Epoch { job_id, epoch, total, metrics } => {
                info!(
                    %job_id,
                    epoch,
                    total,
                    train_mse = metrics.train_mse,
                    val_mse = ?metrics.val_mse,
                    val_r2 = ?metrics.val_r2,
                    "Epoch finished"
                );
            }
            ProgressEvent::Finished { job_id, artifact } => {
                info!(%job_id, %artifact, "Training completed");
            }
            ProgressEvent::Failed { job_id, error } => error!(%job_id, %error, "Training failed"),
        }
    }
}
