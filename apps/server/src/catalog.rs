//! Read-mostly indexes of uploaded datasets and built models.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use helix_training::{ArtifactLocator, BlueprintMetrics, JobRecord, JobStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetEntry {
    pub id: String,
    /// File name given by the uploader.
    pub name: String,
    pub size: usize,
    pub records: usize,
    pub columns: Vec<String>,
    pub uploaded_at: DateTime<Utc>,
    pub locator: ArtifactLocator,
    /// Hex SHA-256 of the uploaded bytes.
    pub checksum: String,
}

#[derive(Debug, Default)]
pub struct DatasetCatalog {
    entries: RwLock<HashMap<String, DatasetEntry>>,
}

impl DatasetCatalog {
    pub async fn insert(&self, entry: DatasetEntry) {
        self.entries.write().await.insert(entry.id.clone(), entry);
    }

    pub async fn get(&self, id: &str) -> Option<DatasetEntry> {
        self.entries.read().await.get(id).cloned()
    }

    /// Oldest upload first.
    pub async fn list(&self) -> Vec<DatasetEntry> {
        let mut entries: Vec<DatasetEntry> = self.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then_with(|| a.id.cmp(&b.id)));
        entries
    }

    /// Map a dataset id to its locator. Unknown references are taken to be
    /// locators already.
    pub async fn resolve(&self, reference: &str) -> String {
        match self.entries.read().await.get(reference) {
            Some(entry) => entry.locator.as_str().to_string(),
            None => reference.to_string(),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Response body of a model build, also kept as the catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltModel {
    pub model_id: String,
    pub model_type: String,
    pub metrics: BlueprintMetrics,
    pub architecture: String,
    pub activation_function: String,
    pub optimizer: String,
    pub learning_rate: f64,
    pub locator: ArtifactLocator,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelOrigin {
    Blueprint,
    Trained,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub id: String,
    pub origin: ModelOrigin,
    pub status: String,
    pub model_type: String,
    pub locator: ArtifactLocator,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BlueprintMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

const TRAINED_SUFFIX: &str = "_model";

impl From<&BuiltModel> for ModelSummary {
    fn from(model: &BuiltModel) -> Self {
        Self {
            id: model.model_id.clone(),
            origin: ModelOrigin::Blueprint,
            status: "ready".to_string(),
            model_type: model.model_type.clone(),
            locator: model.locator.clone(),
            created_at: model.created_at,
            metrics: Some(model.metrics),
            job_id: None,
        }
    }
}

impl ModelSummary {
    /// Summary of a completed job's trained parameters, `None` for any job
    /// that has not completed.
    #[must_use]
    pub fn from_job(record: &JobRecord) -> Option<Self> {
        if record.status != JobStatus::Completed {
            return None;
        }
        let locator = record.artifact_location.clone()?;
        Some(Self {
            id: format!("{}{TRAINED_SUFFIX}", record.id),
            origin: ModelOrigin::Trained,
            status: "ready".to_string(),
            model_type: "regression".to_string(),
            locator,
            created_at: record.completed_at.unwrap_or(record.started_at),
            metrics: None,
            job_id: Some(record.id.to_string()),
        })
    }

    /// Job id behind a trained model id.
    #[must_use]
    pub fn trained_job_id(model_id: &str) -> Option<&str> {
        model_id.strip_suffix(TRAINED_SUFFIX).filter(|job| !job.is_empty())
    }
}

#[derive(Debug, Default)]
pub struct ModelCatalog {
    models: RwLock<HashMap<String, BuiltModel>>,
}

impl ModelCatalog {
    pub async fn insert(&self, model: BuiltModel) {
        self.models.write().await.insert(model.model_id.clone(), model);
    }

    pub async fn get(&self, id: &str) -> Option<BuiltModel> {
        self.models.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<BuiltModel> {
        self.models.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_training::{JobConfig, JobId};

    fn dataset(id: &str) -> DatasetEntry {
        DatasetEntry {
            id: id.to_string(),
            name: "houses.csv".to_string(),
            size: 10,
            records: 2,
            columns: vec!["x".to_string(), "y".to_string()],
            uploaded_at: Utc::now(),
            locator: ArtifactLocator(format!("memory://datasets/{id}.csv")),
            checksum: "00".to_string(),
        }
    }

    #[tokio::test]
    async fn test_resolve_known_and_unknown_references() {
        let catalog = DatasetCatalog::default();
        catalog.insert(dataset("dataset_1")).await;

        assert_eq!(catalog.resolve("dataset_1").await, "memory://datasets/dataset_1.csv");
        assert_eq!(catalog.resolve("local://elsewhere.csv").await, "local://elsewhere.csv");
        assert_eq!(catalog.len().await, 1);
    }

    #[test]
    fn test_dataset_entry_wire_names() {
        let json = serde_json::to_value(dataset("d")).unwrap();
        assert!(json.get("uploadedAt").is_some());
        assert_eq!(json["locator"], "memory://datasets/d.csv");
    }

    #[test]
    fn test_trained_summary_only_for_completed_jobs() {
        let mut record = JobRecord::new(JobId::from("job_abc"), JobConfig::new("memory://d.csv"));
        assert!(ModelSummary::from_job(&record).is_none());

        record.mark_running().unwrap();
        record.complete(ArtifactLocator("memory://models/job_abc_model.json".to_string())).unwrap();
        let summary = ModelSummary::from_job(&record).unwrap();
        assert_eq!(summary.id, "job_abc_model");
        assert_eq!(summary.origin, ModelOrigin::Trained);
        assert_eq!(ModelSummary::trained_job_id(&summary.id), Some("job_abc"));
        assert_eq!(ModelSummary::trained_job_id("_model"), None);
    }
}
