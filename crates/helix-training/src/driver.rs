//! Epoch-by-epoch execution of one training job.
//!
//! `Initializing -> Epoch 1..N -> Finalizing -> {Completed, Failed}`.
//!
//! The driver is the only writer of its job's record. Every error or panic is
//! caught in [`TrainingDriver::run`] and recorded as a `Failed` transition;
//! nothing escapes to the caller.

use crate::artifacts::{ArtifactLocator, ArtifactStore};
use crate::dataset::{self, Partition, PreparedDataset};
use crate::error::{TrainingError, TrainingResult};
use crate::job::{JobConfig, JobId, ProgressSnapshot};
use crate::layout::StorageLayout;
use crate::metrics::{absolute_error_sum, mean_squared_error, r_squared, EpochMetrics, RunningErrors};
use crate::model::{select_device, ComputeDevice, ModelFactory, ModelInit, TrainableModel};
use crate::progress::{ProgressEvent, ProgressSink, TracingProgressSink};
use crate::registry::JobRegistry;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

pub struct TrainingDriver {
    registry: Arc<JobRegistry>,
    store: ArtifactStore,
    models: Arc<dyn ModelFactory>,
    layout: StorageLayout,
    sink: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for TrainingDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingDriver")
            .field("store", &self.store)
            .field("models", &self.models.name())
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl TrainingDriver {
    #[must_use]
    pub fn new(registry: Arc<JobRegistry>, store: ArtifactStore, models: Arc<dyn ModelFactory>) -> Self {
        Self {
            registry,
            store,
            models,
            layout: StorageLayout::default(),
            sink: Arc::new(TracingProgressSink),
        }
    }

    #[must_use]
    pub fn with_layout(mut self, layout: StorageLayout) -> Self {
        self.layout = layout;
        self
    }

    #[must_use]
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Drive `job_id` to a terminal state.
    pub async fn run(&self, job_id: JobId, config: JobConfig) {
        let outcome = AssertUnwindSafe(self.execute(&job_id, &config)).catch_unwind().await;
        let message = match outcome {
            Ok(Ok(artifact)) => {
                self.sink.on_event(ProgressEvent::Finished { job_id, artifact });
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        self.record_failure(&job_id, message).await;
    }

    async fn execute(&self, job_id: &JobId, config: &JobConfig) -> TrainingResult<ArtifactLocator> {
        // Initializing
        let raw = self.store.get(&ArtifactLocator(config.dataset_ref.clone())).await?;
        let prepared = dataset::prepare(&raw, config.validation_split)?;
        drop(raw);

        let device = select_device(config.gpu_enabled, self.models.as_ref());
        if config.gpu_enabled && device == ComputeDevice::Cpu {
            debug!(%job_id, backend = self.models.name(), "Accelerator unavailable, training on CPU");
        }
        let model = self.models.build(&ModelInit {
            input_dim: prepared.feature_dim,
            hidden_size: config.hidden_size as usize,
            learning_rate: config.learning_rate,
            device,
            seed: config.seed,
        })?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        self.sink.on_event(ProgressEvent::Started {
            job_id: job_id.clone(),
            device: model.device(),
            train_rows: prepared.train.len(),
            validation_rows: prepared.validation.len(),
        });

        // Epochs
        let total = config.epochs;
        let mut runner =
            EpochRunner { model, rng, data: Arc::new(prepared), batch_size: config.batch_size as usize };
        for epoch in 1..=total {
            let (next, metrics) = runner.run().await?;
            runner = next;
            let snapshot = ProgressSnapshot::for_epoch(epoch, total, metrics);
            self.registry.update(job_id, |record| record.publish_progress(snapshot)).await?;
            self.sink.on_event(ProgressEvent::Epoch {
                job_id: job_id.clone(),
                epoch,
                total,
                metrics: snapshot.metrics,
            });
            tokio::task::yield_now().await;
        }

        // Finalizing
        let parameters = runner.model.export_parameters()?;
        let locator = self.store.put(&self.layout.trained_model_key(job_id), parameters).await?;
        if let Err(e) = self.registry.update(job_id, |record| record.complete(locator.clone())).await {
            self.store.delete(&locator).await;
            return Err(e);
        }
        Ok(locator)
    }

    async fn record_failure(&self, job_id: &JobId, message: String) {
        let result = self.registry.update(job_id, |record| record.fail(message.clone())).await;
        match result {
            Ok(()) => self.sink.on_event(ProgressEvent::Failed { job_id: job_id.clone(), error: message }),
            Err(e) => error!(%job_id, error = %e, original = %message, "Could not record job failure"),
        }
    }
}

/// What one job carries from epoch to epoch.
///
/// Epochs are CPU-bound, so each one runs on the blocking pool and the
/// runner is moved there and back. The async workers stay free for progress
/// reads and other jobs.
struct EpochRunner {
    model: Box<dyn TrainableModel>,
    rng: StdRng,
    data: Arc<PreparedDataset>,
    batch_size: usize,
}

impl EpochRunner {
    async fn run(self) -> TrainingResult<(Self, EpochMetrics)> {
        tokio::task::spawn_blocking(move || {
            let mut runner = self;
            let metrics = run_epoch(runner.model.as_mut(), &runner.data, runner.batch_size, &mut runner.rng)?;
            Ok((runner, metrics))
        })
        .await
        .map_err(|e| match e.try_into_panic() {
            Ok(payload) => TrainingError::Trainer(panic_message(payload.as_ref())),
            Err(e) => TrainingError::Trainer(format!("epoch task aborted: {e}")),
        })?
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("training panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("training panicked: {s}")
    } else {
        "training panicked".to_string()
    }
}

/// One pass over the training partition, then the validation passes.
fn run_epoch(
    model: &mut dyn TrainableModel,
    data: &PreparedDataset,
    batch_size: usize,
    rng: &mut StdRng,
) -> TrainingResult<EpochMetrics> {
    let mut train = RunningErrors::default();
    for batch in data.train.shuffled_batches(batch_size, rng) {
        let out = model.forward_loss(&batch)?;
        if !out.loss.is_finite() {
            return Err(TrainingError::Trainer(format!("training diverged: loss is {}", out.loss)));
        }
        model.optimize_step()?;
        train.record_batch(out.loss, batch.len(), absolute_error_sum(&out.predictions, &batch.targets));
    }

    let mut metrics = EpochMetrics { train_mse: train.mse(), train_mae: train.mae(), ..EpochMetrics::default() };
    if !data.validation.is_empty() {
        let (mse, mae, r2) = evaluate(model, &data.validation, batch_size)?;
        if !(mse.is_finite() && mae.is_finite()) {
            return Err(TrainingError::Trainer(format!("validation diverged: mse is {mse}, mae is {mae}")));
        }
        metrics.val_mse = Some(mse);
        metrics.val_mae = Some(mae);
        metrics.val_r2 = r2;
    }
    Ok(metrics)
}

/// Validation without gradients.
///
/// The first pass accumulates MSE/MAE batch by batch. R² needs the mean of
/// the whole target column, so a second pass gathers the full prediction
/// vector once every target has been seen.
fn evaluate(
    model: &dyn TrainableModel,
    partition: &Partition,
    batch_size: usize,
) -> TrainingResult<(f64, f64, Option<f64>)> {
    let batches = partition.batches(batch_size);

    let mut running = RunningErrors::default();
    let mut targets = Vec::with_capacity(partition.len());
    for batch in &batches {
        let predictions = model.predict(&batch.rows)?;
        running.record_batch(
            mean_squared_error(&predictions, &batch.targets),
            batch.len(),
            absolute_error_sum(&predictions, &batch.targets),
        );
        targets.extend_from_slice(&batch.targets);
    }

    let mut predictions = Vec::with_capacity(partition.len());
    for batch in &batches {
        predictions.extend(model.predict(&batch.rows)?);
    }

    Ok((running.mse(), running.mae(), r_squared(&predictions, &targets)))
}
