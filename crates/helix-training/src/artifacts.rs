//! Object storage for datasets and trained parameters.
//!
//! Backends implement [`ObjectStore`]. Everything in the crate goes through
//! [`ArtifactStore`], which bounds every call with a timeout and normalizes
//! failures into the crate's error taxonomy.

use crate::error::{TrainingError, TrainingResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Opaque handle to stored bytes, e.g. `local://models/job_1_model.json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactLocator(pub String);

impl ArtifactLocator {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(scheme, key)`.
    #[must_use]
    pub fn parts(&self) -> Option<(&str, &str)> {
        self.0.split_once("://")
    }
}

impl std::fmt::Display for ArtifactLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A raw storage backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn put(&self, key: &str, bytes: Vec<u8>) -> TrainingResult<ArtifactLocator>;

    async fn get(&self, locator: &ArtifactLocator) -> TrainingResult<Vec<u8>>;

    async fn delete(&self, locator: &ArtifactLocator) -> TrainingResult<()>;
}

pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout-bounded front for an [`ObjectStore`].
#[derive(Clone)]
pub struct ArtifactStore {
    backend: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("backend", &self.backend.backend())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ArtifactStore {
    #[must_use]
    pub fn new(backend: Arc<dyn ObjectStore>) -> Self {
        Self { backend, timeout: DEFAULT_STORAGE_TIMEOUT }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryObjectStore::new()))
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.backend()
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>) -> TrainingResult<ArtifactLocator> {
        let size = bytes.len();
        let locator = self.bounded("put", key, self.backend.put(key, bytes)).await?;
        debug!(%locator, size, "Stored object");
        Ok(locator)
    }

    pub async fn get(&self, locator: &ArtifactLocator) -> TrainingResult<Vec<u8>> {
        self.bounded("get", locator.as_str(), self.backend.get(locator)).await
    }

    /// Best effort. Failures are logged and reported as `false`.
    pub async fn delete(&self, locator: &ArtifactLocator) -> bool {
        match self.bounded("delete", locator.as_str(), self.backend.delete(locator)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%locator, error = %e, "Failed to delete object");
                false
            }
        }
    }

    async fn bounded<T>(
        &self,
        op: &str,
        target: &str,
        fut: impl std::future::Future<Output = TrainingResult<T>>,
    ) -> TrainingResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(TrainingError::StorageUnavailable(format!(
                "{op} {target} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

fn check_key(key: &str) -> TrainingResult<()> {
    let path = Path::new(key);
    let clean = !key.is_empty()
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if clean {
        Ok(())
    } else {
        Err(TrainingError::InvalidConfig(format!("invalid object key: {key:?}")))
    }
}

fn key_for<'a>(locator: &'a ArtifactLocator, scheme: &str) -> TrainingResult<&'a str> {
    match locator.parts() {
        Some((s, key)) if s == scheme => {
            check_key(key)?;
            Ok(key)
        }
        _ => Err(TrainingError::NotFound(format!("unsupported locator for {scheme} store: {locator}"))),
    }
}

/// Stores objects as files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub const SCHEME: &'static str = "local";

    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn map_io(err: std::io::Error, target: &str) -> TrainingError {
        if err.kind() == std::io::ErrorKind::NotFound {
            TrainingError::NotFound(format!("object not found: {target}"))
        } else {
            TrainingError::StorageUnavailable(format!("{target}: {err}"))
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> TrainingResult<ArtifactLocator> {
        check_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| Self::map_io(e, key))?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| Self::map_io(e, key))?;
        Ok(ArtifactLocator(format!("{}://{key}", Self::SCHEME)))
    }

    async fn get(&self, locator: &ArtifactLocator) -> TrainingResult<Vec<u8>> {
        let key = key_for(locator, Self::SCHEME)?;
        tokio::fs::read(self.root.join(key)).await.map_err(|e| Self::map_io(e, locator.as_str()))
    }

    async fn delete(&self, locator: &ArtifactLocator) -> TrainingResult<()> {
        let key = key_for(locator, Self::SCHEME)?;
        tokio::fs::remove_file(self.root.join(key)).await.map_err(|e| Self::map_io(e, locator.as_str()))
    }
}

/// Keeps objects in process memory. Used by tests and `storage.backend = "memory"`.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub const SCHEME: &'static str = "memory";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> TrainingResult<ArtifactLocator> {
        check_key(key)?;
        self.objects.write().await.insert(key.to_string(), bytes);
        Ok(ArtifactLocator(format!("{}://{key}", Self::SCHEME)))
    }

    async fn get(&self, locator: &ArtifactLocator) -> TrainingResult<Vec<u8>> {
        let key = key_for(locator, Self::SCHEME)?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| TrainingError::NotFound(format!("object not found: {locator}")))
    }

    async fn delete(&self, locator: &ArtifactLocator) -> TrainingResult<()> {
        let key = key_for(locator, Self::SCHEME)?;
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| TrainingError::NotFound(format!("object not found: {locator}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    struct StalledStore;

    #[async_trait]
    impl ObjectStore for StalledStore {
        fn backend(&self) -> &'static str {
            "stalled"
        }

        async fn put(&self, _key: &str, _bytes: Vec<u8>) -> TrainingResult<ArtifactLocator> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("timeout fires first")
        }

        async fn get(&self, _locator: &ArtifactLocator) -> TrainingResult<Vec<u8>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("timeout fires first")
        }

        async fn delete(&self, _locator: &ArtifactLocator) -> TrainingResult<()> {
            Err(TrainingError::StorageUnavailable("offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_local_store_roundtrip_and_delete() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(Arc::new(LocalObjectStore::new(temp.path())));

        let locator = store.put("datasets/d1.csv", b"a,y\n1,2\n".to_vec()).await.unwrap();
        assert_eq!(locator.as_str(), "local://datasets/d1.csv");
        assert!(temp.path().join("datasets/d1.csv").exists());
        assert_eq!(store.get(&locator).await.unwrap(), b"a,y\n1,2\n");

        assert!(store.delete(&locator).await);
        assert!(!store.delete(&locator).await);
        let err = store.get(&locator).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_local_store_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp.path());
        assert!(store.put("../escape.csv", vec![1]).await.is_err());
        assert!(store.put("/etc/passwd", vec![1]).await.is_err());
        let err = store.get(&ArtifactLocator("local://../secret".to_string())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_memory_store_rejects_foreign_scheme() {
        let store = ArtifactStore::in_memory();
        let err = store.get(&ArtifactLocator("local://datasets/x.csv".to_string())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_timeouts_surface_as_storage_unavailable() {
        let store = ArtifactStore::new(Arc::new(StalledStore)).with_timeout(Duration::from_millis(50));
        let err = store.put("models/m.json", vec![1, 2, 3]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);

        let err = store.get(&ArtifactLocator("stalled://x".to_string())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    }

    #[tokio::test]
    async fn test_delete_failure_is_not_propagated() {
        let store = ArtifactStore::new(Arc::new(StalledStore));
        assert!(!store.delete(&ArtifactLocator("stalled://x".to_string())).await);
    }
}
