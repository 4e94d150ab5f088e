use crate::job::JobId;

/// Object-store key layout.
///
/// Default layout:
/// - `datasets/<dataset_id>.csv`
/// - `models/<job_id>_model.json` (trained parameters)
/// - `models/<model_id>.json` (built, untrained blueprints)
#[derive(Debug, Clone)]
pub struct StorageLayout {
    prefix: String,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("")
    }
}

impl StorageLayout {
    /// Layout with every key nested under `prefix`. An empty prefix keeps
    /// keys at the store root.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { prefix }
    }

    fn key(&self, rest: String) -> String {
        if self.prefix.is_empty() { rest } else { format!("{}/{rest}", self.prefix) }
    }

    #[must_use]
    pub fn dataset_key(&self, dataset_id: &str) -> String {
        self.key(format!("datasets/{dataset_id}.csv"))
    }

    #[must_use]
    pub fn trained_model_key(&self, job_id: &JobId) -> String {
        self.key(format!("models/{job_id}_model.json"))
    }

    #[must_use]
    pub fn blueprint_key(&self, model_id: &str) -> String {
        self.key(format!("models/{model_id}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_keys() {
        let layout = StorageLayout::default();
        let id = JobId("job_1".to_string());

        assert_eq!(layout.dataset_key("dataset_ab12"), "datasets/dataset_ab12.csv");
        assert_eq!(layout.trained_model_key(&id), "models/job_1_model.json");
        assert_eq!(layout.blueprint_key("model_x"), "models/model_x.json");
    }

    #[test]
    fn test_layout_prefix() {
        let layout = StorageLayout::new("/helix/");
        assert_eq!(layout.dataset_key("d"), "helix/datasets/d.csv");
    }
}
