//! HTTP request handlers.

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use helix_training::{
    content_digest, inspect, BlueprintRequest, JobConfig, JobId, JobProgress, JobStatus, JobSummary, ModelBlueprint,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::catalog::{BuiltModel, DatasetEntry, ModelSummary};
use crate::error::{ApiError, ApiResult};
use crate::response::{ApiResponse, HealthResponse};
use crate::state::AppState;

type ApiJson<T> = ApiResult<Json<ApiResponse<T>>>;

fn ok<T>(data: T) -> ApiJson<T> {
    Ok(Json(ApiResponse::success(data)))
}

/// Eight hex characters, enough to tell uploads apart in a listing.
fn short_id(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &id[..8])
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    pub filename: Option<String>,
}

/// Store a CSV dataset sent as the raw request body.
pub async fn upload_dataset(
    State(state): State<AppState>,
    params: Result<Query<UploadParams>, QueryRejection>,
    body: Bytes,
) -> ApiJson<DatasetEntry> {
    let Query(params) = params?;
    let summary = inspect(&body)?;

    let id = short_id("dataset");
    let locator = state.store.put(&state.layout.dataset_key(&id), body.to_vec()).await?;
    let entry = DatasetEntry {
        id,
        name: params.filename.unwrap_or_else(|| "dataset.csv".to_string()),
        size: body.len(),
        records: summary.records,
        columns: summary.columns,
        uploaded_at: Utc::now(),
        locator,
        checksum: content_digest(&body),
    };
    info!(dataset_id = %entry.id, records = entry.records, size = entry.size, "Dataset uploaded");
    state.datasets.insert(entry.clone()).await;
    ok(entry)
}

pub async fn list_datasets(State(state): State<AppState>) -> ApiJson<Vec<DatasetEntry>> {
    ok(state.datasets.list().await)
}

/// Body of `POST /train`. Both snake_case and camelCase field names are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainRequest {
    /// Dataset id from an upload, or a raw store locator.
    #[serde(alias = "datasetId", alias = "datasetRef", alias = "dataset_ref")]
    pub dataset_id: String,
    pub epochs: Option<u32>,
    #[serde(alias = "batchSize")]
    pub batch_size: Option<u32>,
    #[serde(alias = "validationSplit")]
    pub validation_split: Option<f64>,
    #[serde(alias = "gpuEnabled")]
    pub gpu_enabled: Option<bool>,
    #[serde(alias = "learningRate")]
    pub learning_rate: Option<f64>,
    #[serde(alias = "hiddenSize")]
    pub hidden_size: Option<u32>,
    pub seed: Option<u64>,
}

impl TrainRequest {
    fn into_config(self, dataset_ref: String) -> JobConfig {
        let defaults = JobConfig::new(dataset_ref);
        JobConfig {
            epochs: self.epochs.unwrap_or(defaults.epochs),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            validation_split: self.validation_split.unwrap_or(defaults.validation_split),
            gpu_enabled: self.gpu_enabled.unwrap_or(defaults.gpu_enabled),
            learning_rate: self.learning_rate.unwrap_or(defaults.learning_rate),
            hidden_size: self.hidden_size.unwrap_or(defaults.hidden_size),
            seed: self.seed,
            ..defaults
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

pub async fn start_training(
    State(state): State<AppState>,
    payload: Result<Json<TrainRequest>, JsonRejection>,
) -> ApiJson<TrainResponse> {
    let Json(request) = payload?;
    let dataset_ref = state.datasets.resolve(&request.dataset_id).await;
    let ticket = state.supervisor.submit(request.into_config(dataset_ref)).await?;
    ok(TrainResponse { job_id: ticket.job_id, status: ticket.status, message: "Training started".to_string() })
}

pub async fn job_progress(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiJson<JobProgress> {
    ok(state.supervisor.progress(&JobId::from(job_id.as_str())).await?)
}

pub async fn list_jobs(State(state): State<AppState>) -> ApiJson<Vec<JobSummary>> {
    ok(state.supervisor.list_jobs().await)
}

/// Validate a model description, persist its blueprint and report its size.
pub async fn build_model(
    State(state): State<AppState>,
    payload: Result<Json<BlueprintRequest>, JsonRejection>,
) -> ApiJson<BuiltModel> {
    let Json(request) = payload?;
    let blueprint = ModelBlueprint::build(&request)?;

    let model_id = short_id("model");
    let locator = state.store.put(&state.layout.blueprint_key(&model_id), blueprint.to_json()?).await?;
    let model = BuiltModel {
        model_id,
        model_type: blueprint.model_type.to_string(),
        metrics: blueprint.metrics(),
        architecture: request.architecture,
        activation_function: blueprint.activation_function.as_str().to_string(),
        optimizer: blueprint.optimizer.as_str().to_string(),
        learning_rate: blueprint.learning_rate,
        locator,
        created_at: Utc::now(),
    };
    info!(
        model_id = %model.model_id,
        model_type = %model.model_type,
        parameters = model.metrics.total_parameters,
        "Model built"
    );
    state.models.insert(model.clone()).await;
    ok(model)
}

/// Built blueprints and the trained parameters of completed jobs.
pub async fn list_models(State(state): State<AppState>) -> ApiJson<Vec<ModelSummary>> {
    let mut models: Vec<ModelSummary> = state.models.list().await.iter().map(ModelSummary::from).collect();
    let jobs = state.supervisor.registry().list_all().await;
    models.extend(jobs.iter().filter_map(ModelSummary::from_job));
    models.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    ok(models)
}

pub async fn get_model(State(state): State<AppState>, Path(model_id): Path<String>) -> ApiJson<ModelSummary> {
    if let Some(model) = state.models.get(&model_id).await {
        return ok(ModelSummary::from(&model));
    }
    if let Some(job_id) = ModelSummary::trained_job_id(&model_id) {
        if let Ok(record) = state.supervisor.registry().get(&JobId::from(job_id)).await {
            if let Some(summary) = ModelSummary::from_job(&record) {
                return ok(summary);
            }
        }
    }
    Err(ApiError::NotFound(format!("model not found: {model_id}")))
}

pub async fn health_check(State(state): State<AppState>) -> ApiJson<HealthResponse> {
    ok(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        storage: state.store.backend_name().to_string(),
        datasets: state.datasets.len().await,
        jobs: state.supervisor.registry().len().await,
        active_jobs: state.supervisor.active_jobs().await,
    })
}
