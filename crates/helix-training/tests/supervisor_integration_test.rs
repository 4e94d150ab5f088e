//! End-to-end tests for job submission, progress and failure isolation.

use async_trait::async_trait;
use helix_training::dataset::Batch;
use helix_training::{
    ArtifactLocator, ArtifactStore, ComputeDevice, ErrorKind, InMemoryObjectStore, JobConfig, JobRegistry, JobStatus,
    JobSupervisor, LocalObjectStore, MlpFactory, ModelFactory, ModelInit, ObjectStore, ProgressEvent, ProgressSink,
    StepOutput, StorageLayout, TrainableModel, TrainingDriver, TrainingError, TrainingResult,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Records every event it receives.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    fn epochs_for(&self, job_id: &str) -> Vec<u32> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Epoch { job_id: id, epoch, .. } if id.as_str() == job_id => Some(*epoch),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn on_event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// In-memory store that refuses to write trained models.
struct ModelWriteOutage {
    inner: InMemoryObjectStore,
}

#[async_trait]
impl ObjectStore for ModelWriteOutage {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> TrainingResult<ArtifactLocator> {
        if key.starts_with("models/") && key.contains("outage") {
            return Err(TrainingError::StorageUnavailable("simulated outage".to_string()));
        }
        self.inner.put(key, bytes).await
    }

    async fn get(&self, locator: &ArtifactLocator) -> TrainingResult<Vec<u8>> {
        self.inner.get(locator).await
    }

    async fn delete(&self, locator: &ArtifactLocator) -> TrainingResult<()> {
        self.inner.delete(locator).await
    }
}

/// Holds its thread for a while on every training batch, like a heavy epoch.
struct BusyModel;

const BUSY_BATCH: Duration = Duration::from_millis(400);

impl TrainableModel for BusyModel {
    fn device(&self) -> ComputeDevice {
        ComputeDevice::Cpu
    }

    fn parameter_count(&self) -> usize {
        1
    }

    fn forward_loss(&mut self, batch: &Batch<'_>) -> TrainingResult<StepOutput> {
        std::thread::sleep(BUSY_BATCH);
        Ok(StepOutput { predictions: batch.targets.clone(), loss: 0.0 })
    }

    fn optimize_step(&mut self) -> TrainingResult<()> {
        Ok(())
    }

    fn predict(&self, rows: &[&[f32]]) -> TrainingResult<Vec<f32>> {
        Ok(vec![0.0; rows.len()])
    }

    fn export_parameters(&self) -> TrainingResult<Vec<u8>> {
        Ok(b"{}".to_vec())
    }
}

struct BusyFactory;

impl ModelFactory for BusyFactory {
    fn name(&self) -> &'static str {
        "busy"
    }

    fn accelerator_available(&self) -> bool {
        false
    }

    fn build(&self, _init: &ModelInit) -> TrainingResult<Box<dyn TrainableModel>> {
        Ok(Box::new(BusyModel))
    }
}

fn regression_csv(rows: usize) -> String {
    let mut csv = String::from("a,b,c,target\n");
    for i in 0..rows {
        let a = (i % 7) as f32 / 7.0;
        let b = (i % 5) as f32 / 5.0;
        let c = (i % 3) as f32 / 3.0;
        csv.push_str(&format!("{a},{b},{c},{}\n", 2.0 * a - b + 0.5 * c));
    }
    csv
}

struct Harness {
    supervisor: JobSupervisor,
    sink: Arc<RecordingSink>,
    store: ArtifactStore,
}

fn harness_with(store: ArtifactStore) -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let driver = TrainingDriver::new(Arc::new(JobRegistry::new()), store.clone(), Arc::new(MlpFactory))
        .with_progress_sink(sink.clone());
    Harness { supervisor: JobSupervisor::new(driver), sink, store }
}

async fn upload(store: &ArtifactStore, key: &str, csv: &str) -> String {
    store.put(key, csv.as_bytes().to_vec()).await.unwrap().0
}

fn config(dataset: &str, epochs: u32) -> JobConfig {
    let mut config = JobConfig::new(dataset);
    config.epochs = epochs;
    config.batch_size = 8;
    config.learning_rate = 0.01;
    config.seed = Some(7);
    config
}

#[tokio::test]
async fn test_five_epochs_complete_in_order() {
    let h = harness_with(ArtifactStore::in_memory());
    let dataset = upload(&h.store, "datasets/d.csv", &regression_csv(50)).await;

    let ticket = h.supervisor.submit(config(&dataset, 5)).await.unwrap();
    assert_eq!(ticket.status, JobStatus::Running);
    assert!(ticket.job_id.as_str().starts_with("job_"));

    let record = h.supervisor.join(&ticket.job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.progress.current_epoch, 5);
    assert_eq!(record.progress.total_epochs, 5);
    assert_eq!(record.progress.percent_complete, 100);
    assert!(record.error.is_none());
    assert!(record.completed_at.is_some());
    assert_eq!(h.sink.epochs_for(ticket.job_id.as_str()), vec![1, 2, 3, 4, 5]);

    let artifact = record.artifact_location.unwrap();
    assert!(!h.store.get(&artifact).await.unwrap().is_empty());

    let metrics = record.progress.metrics;
    assert!(metrics.train_mse >= 0.0);
    assert!(metrics.val_mse.is_some());
    assert!(metrics.val_r2.is_some());
}

#[tokio::test]
async fn test_progress_never_goes_backwards() {
    let h = harness_with(ArtifactStore::in_memory());
    let dataset = upload(&h.store, "datasets/d.csv", &regression_csv(200)).await;
    let ticket = h.supervisor.submit(config(&dataset, 20)).await.unwrap();

    let mut last = 0;
    loop {
        let progress = h.supervisor.progress(&ticket.job_id).await.unwrap();
        assert!(progress.progress.current_epoch >= last);
        assert!(progress.progress.current_epoch <= progress.progress.total_epochs);
        last = progress.progress.current_epoch;
        if progress.status.is_terminal() {
            assert_eq!(progress.status, JobStatus::Completed);
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(last, 20);
}

#[tokio::test]
async fn test_zero_split_reports_no_validation_metrics() {
    let h = harness_with(ArtifactStore::in_memory());
    let dataset = upload(&h.store, "datasets/d.csv", &regression_csv(30)).await;
    let mut config = config(&dataset, 3);
    config.validation_split = 0.0;

    let ticket = h.supervisor.submit(config).await.unwrap();
    let record = h.supervisor.join(&ticket.job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);

    let metrics = record.progress.metrics;
    assert_eq!(metrics.val_mse, None);
    assert_eq!(metrics.val_mae, None);
    assert_eq!(metrics.val_r2, None);

    let events = h.sink.events.lock().unwrap();
    for event in events.iter() {
        if let ProgressEvent::Epoch { metrics, .. } = event {
            assert!(metrics.val_mse.is_none());
        }
    }
}

#[tokio::test]
async fn test_constant_validation_target_omits_r2() {
    let h = harness_with(ArtifactStore::in_memory());
    let mut csv = regression_csv(40);
    // the last 10 rows form the validation partition at split 0.2 of 50
    for i in 0..10 {
        csv.push_str(&format!("{},{},{},4.0\n", i, i + 1, i + 2));
    }
    let dataset = upload(&h.store, "datasets/d.csv", &csv).await;

    let ticket = h.supervisor.submit(config(&dataset, 2)).await.unwrap();
    let record = h.supervisor.join(&ticket.job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert!(record.progress.metrics.val_mse.is_some());
    assert_eq!(record.progress.metrics.val_r2, None);
}

#[tokio::test]
async fn test_jobs_on_same_dataset_are_independent() {
    let h = harness_with(ArtifactStore::in_memory());
    let dataset = upload(&h.store, "datasets/d.csv", &regression_csv(60)).await;

    let first = h.supervisor.submit(config(&dataset, 3)).await.unwrap();
    let second = h.supervisor.submit(config(&dataset, 6)).await.unwrap();
    assert_ne!(first.job_id, second.job_id);

    let a = h.supervisor.join(&first.job_id).await.unwrap();
    let b = h.supervisor.join(&second.job_id).await.unwrap();
    assert_eq!(a.progress.total_epochs, 3);
    assert_eq!(b.progress.total_epochs, 6);
    assert_ne!(a.artifact_location, b.artifact_location);
    assert_eq!(h.sink.epochs_for(first.job_id.as_str()), vec![1, 2, 3]);
    assert_eq!(h.sink.epochs_for(second.job_id.as_str()), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(h.supervisor.list_jobs().await.len(), 2);
}

#[tokio::test]
async fn test_storage_outage_during_finalize_fails_only_that_job() {
    let store = ArtifactStore::new(Arc::new(ModelWriteOutage { inner: InMemoryObjectStore::new() }));
    let h = harness_with(store);
    let dataset = upload(&h.store, "datasets/d.csv", &regression_csv(40)).await;

    // Same registry and store, but trained models land under a prefix the
    // store refuses to write.
    let outage_driver = TrainingDriver::new(h.supervisor.registry().clone(), h.store.clone(), Arc::new(MlpFactory))
        .with_layout(StorageLayout::new("models/outage"));
    let outage = JobSupervisor::new(outage_driver);

    let bystanders = [
        h.supervisor.submit(config(&dataset, 2)).await.unwrap(),
        h.supervisor.submit(config(&dataset, 2)).await.unwrap(),
    ];
    let doomed = outage.submit(config(&dataset, 2)).await.unwrap();

    let failed = outage.join(&doomed.job_id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    let error = failed.error.unwrap();
    assert!(error.contains("storage unavailable"), "{error}");
    assert!(failed.artifact_location.is_none());
    assert_eq!(failed.progress.current_epoch, 2);

    for ticket in bystanders {
        let record = h.supervisor.join(&ticket.job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.artifact_location.is_some());
    }
}

#[tokio::test]
async fn test_submit_returns_before_training_finishes() {
    let h = harness_with(ArtifactStore::in_memory());
    let dataset = upload(&h.store, "datasets/d.csv", &regression_csv(100)).await;

    let started = Instant::now();
    let ticket = h.supervisor.submit(config(&dataset, 50)).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    let progress = h.supervisor.progress(&ticket.job_id).await.unwrap();
    assert!(!progress.status.is_terminal());
    assert!(h.supervisor.active_jobs().await >= 1);
    h.supervisor.shutdown().await;
    assert_eq!(h.supervisor.progress(&ticket.job_id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_bad_split_and_bad_data_fail_the_job() {
    let h = harness_with(ArtifactStore::in_memory());
    let dataset = upload(&h.store, "datasets/d.csv", &regression_csv(10)).await;
    let text = upload(&h.store, "datasets/text.csv", "a,b\n1,x\n").await;

    let mut bad_split = config(&dataset, 2);
    bad_split.validation_split = 1.0;
    let split_job = h.supervisor.submit(bad_split).await.unwrap();
    let text_job = h.supervisor.submit(config(&text, 2)).await.unwrap();
    let missing_job = h.supervisor.submit(config("memory://datasets/absent.csv", 2)).await.unwrap();

    for (ticket, needle) in [(split_job, "validation_split"), (text_job, "malformed"), (missing_job, "not found")] {
        let record = h.supervisor.join(&ticket.job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        let error = record.error.unwrap();
        assert!(error.contains(needle), "{error} lacks {needle}");
    }
}

#[tokio::test]
async fn test_submit_rejects_malformed_config() {
    let h = harness_with(ArtifactStore::in_memory());
    let mut config = config("memory://datasets/d.csv", 1);
    config.batch_size = 0;
    let err = h.supervisor.submit(config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(h.supervisor.list_jobs().await.is_empty());
}

#[tokio::test]
async fn test_local_backend_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::new(Arc::new(LocalObjectStore::new(dir.path())));
    let h = harness_with(store);
    let dataset = upload(&h.store, "datasets/d.csv", &regression_csv(20)).await;
    assert!(dataset.starts_with("local://"));

    let ticket = h.supervisor.submit(config(&dataset, 2)).await.unwrap();
    let record = h.supervisor.join(&ticket.job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    let expected = dir.path().join("models").join(format!("{}_model.json", ticket.job_id));
    assert!(expected.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_running_epochs_do_not_delay_progress_reads() {
    let store = ArtifactStore::in_memory();
    let dataset = upload(&store, "datasets/d.csv", &regression_csv(10)).await;
    let driver = TrainingDriver::new(Arc::new(JobRegistry::new()), store, Arc::new(BusyFactory));
    let supervisor = Arc::new(JobSupervisor::new(driver));

    let mut busy = config(&dataset, 1);
    busy.batch_size = 64;
    let first = supervisor.submit(busy.clone()).await.unwrap().job_id;
    let second = supervisor.submit(busy).await.unwrap().job_id;
    // Let both jobs reach their epoch.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reader = Arc::clone(&supervisor);
    let target = second.clone();
    let started = Instant::now();
    let progress = tokio::spawn(async move { reader.progress(&target).await }).await.unwrap().unwrap();
    let elapsed = started.elapsed();

    assert_eq!(progress.status, JobStatus::Running);
    assert!(elapsed < BUSY_BATCH / 2, "progress read waited {elapsed:?}");

    supervisor.shutdown().await;
    for job_id in [first, second] {
        assert_eq!(supervisor.join(&job_id).await.unwrap().status, JobStatus::Completed);
    }
}
