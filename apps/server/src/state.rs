use std::sync::Arc;
use std::time::Instant;

use helix_training::{
    ArtifactStore, InMemoryObjectStore, JobRegistry, JobSupervisor, LocalObjectStore, MlpFactory, ObjectStore,
    StorageLayout, TrainingDriver,
};
use tracing::info;

use crate::catalog::{DatasetCatalog, ModelCatalog};
use crate::config::{Config, StorageBackend};

/// Shared handler state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    pub supervisor: Arc<JobSupervisor>,
    pub store: ArtifactStore,
    pub layout: StorageLayout,
    pub datasets: Arc<DatasetCatalog>,
    pub models: Arc<ModelCatalog>,
    started: Instant,
}

impl AppState {
    /// Wire the training engine on top of `store`.
    #[must_use]
    pub fn new(store: ArtifactStore) -> Self {
        let layout = StorageLayout::default();
        let driver = TrainingDriver::new(Arc::new(JobRegistry::new()), store.clone(), Arc::new(MlpFactory))
            .with_layout(layout.clone());
        Self {
            supervisor: Arc::new(JobSupervisor::new(driver)),
            store,
            layout,
            datasets: Arc::new(DatasetCatalog::default()),
            models: Arc::new(ModelCatalog::default()),
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let backend: Arc<dyn ObjectStore> = match config.storage.backend {
            StorageBackend::Local => Arc::new(LocalObjectStore::new(config.storage.root.clone())),
            StorageBackend::Memory => Arc::new(InMemoryObjectStore::new()),
        };
        info!(
            backend = backend.backend(),
            root = %config.storage.root.display(),
            timeout_secs = config.storage.timeout_secs,
            "Artifact store ready"
        );
        Self::new(ArtifactStore::new(backend).with_timeout(config.storage.timeout()))
    }

    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}
