use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::models::{
    EdaTrainingResponse, ExplainRequest, ExplainResponse, HealthResponse, MetricsResponse,
    ModelInfo, ModelsResponse, PredictResponse, ProfileReport,
};
use crate::query::{PollHandle, QueryClient, QueryKey, QuerySpec, QueryState};
use crate::transport::{ApiRequest, MultipartBody, ProgressFn, Transport};
use crate::upload::{Mutation, MutationState, UploadTask};

pub const HEALTH_PATH: &str = "/api/v1/health";
pub const MODELS_PATH: &str = "/api/v1/models";
pub const METRICS_PATH: &str = "/api/v1/metrics";
pub const EDA_TRAINING_PATH: &str = "/api/v1/eda/training";
pub const PREDICT_PATH: &str = "/api/v1/predict";
pub const EXPLAIN_PATH: &str = "/api/v1/explain";
pub const EDA_UPLOAD_PATH: &str = "/api/v1/eda/upload";

pub const DEFAULT_THRESHOLD: f64 = 0.5;
pub const MIN_THRESHOLD: f64 = 0.05;
pub const MAX_THRESHOLD: f64 = 0.95;

pub fn health_spec() -> QuerySpec {
    QuerySpec::new(QueryKey::new(["health"]), ApiRequest::get(HEALTH_PATH))
}

pub fn models_spec() -> QuerySpec {
    QuerySpec::new(QueryKey::new(["models"]), ApiRequest::get(MODELS_PATH))
}

/// Metrics for one model; disabled while no model is selected.
pub fn metrics_spec(model_key: &str) -> QuerySpec {
    QuerySpec::new(
        QueryKey::new(["metrics", model_key]),
        ApiRequest::get(format!(
            "{METRICS_PATH}?model={}",
            urlencoding::encode(model_key)
        )),
    )
    .enabled(!model_key.is_empty())
}

pub fn eda_training_spec() -> QuerySpec {
    QuerySpec::new(
        QueryKey::new(["eda", "training"]),
        ApiRequest::get(EDA_TRAINING_PATH),
    )
}

/// The three dataset slots an upload form accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileField {
    Merged,
    Transaction,
    Identity,
}

impl FileField {
    pub fn form_name(&self) -> &'static str {
        match self {
            FileField::Merged => "file_merged",
            FileField::Transaction => "file_transaction",
            FileField::Identity => "file_identity",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct DatasetFile {
    field: FileField,
    filename: String,
    data: Vec<u8>,
}

/// Datasets attached to a predict or profile submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadFiles {
    files: Vec<DatasetFile>,
}

impl UploadFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach in-memory contents, replacing any file already in that slot.
    pub fn with(mut self, field: FileField, filename: &str, data: Vec<u8>) -> Self {
        self.files.retain(|f| f.field != field);
        self.files.push(DatasetFile {
            field,
            filename: filename.to_string(),
            data,
        });
        self
    }

    pub fn with_path(self, field: FileField, path: &Path) -> Result<Self, ApiError> {
        let data = std::fs::read(path)
            .map_err(|e| ApiError::Invalid(format!("cannot read {}: {e}", path.display())))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.csv", field.form_name()));
        Ok(self.with(field, &filename, data))
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn append_to(&self, mut body: MultipartBody) -> MultipartBody {
        for field in [FileField::Merged, FileField::Transaction, FileField::Identity] {
            if let Some(file) = self.files.iter().find(|f| f.field == field) {
                body = body.file(field.form_name(), &file.filename, file.data.clone());
            }
        }
        body
    }

    fn require_any(&self) -> Result<(), ApiError> {
        if self.is_empty() {
            return Err(ApiError::Invalid(
                "attach at least one of the merged, transaction or identity files".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictRequest {
    pub model: String,
    pub threshold: f64,
    pub files: UploadFiles,
}

impl PredictRequest {
    pub fn new(model: &str, files: UploadFiles) -> Self {
        PredictRequest {
            model: model.to_string(),
            threshold: DEFAULT_THRESHOLD,
            files,
        }
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(MIN_THRESHOLD, MAX_THRESHOLD);
        self
    }

    /// Form body; `threshold` is only sent for models that honour it.
    pub fn to_body(&self, supports_threshold: bool) -> Result<MultipartBody, ApiError> {
        if self.model.is_empty() {
            return Err(ApiError::Invalid("no model selected".to_string()));
        }
        self.files.require_any()?;
        let mut body = MultipartBody::new().text("model", self.model.clone());
        if supports_threshold {
            body = body.text("threshold", self.threshold.to_string());
        }
        Ok(self.files.append_to(body))
    }
}

/// Green/red service indicator derived from the polled health query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthIndicator {
    pub online: bool,
}

impl HealthIndicator {
    pub fn from_state(state: &QueryState<HealthResponse>) -> Self {
        HealthIndicator {
            online: !state.is_error && state.data.as_ref().is_some_and(HealthResponse::is_ok),
        }
    }

    pub fn label(&self) -> &'static str {
        if self.online { "Online" } else { "Offline" }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    Ok(serde_json::from_value(value)?)
}

/// Client facade combining the query cache and the submission slots.
#[derive(Clone)]
pub struct FraudApi {
    queries: QueryClient,
    config: Arc<ClientConfig>,
    predict: Mutation<PredictResponse>,
    explain: Mutation<ExplainResponse>,
    profile: Mutation<ProfileReport>,
}

impl FraudApi {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        FraudApi {
            queries: QueryClient::new(transport),
            config: Arc::new(config),
            predict: Mutation::new(),
            explain: Mutation::new(),
            profile: Mutation::new(),
        }
    }

    pub fn queries(&self) -> &QueryClient {
        &self.queries
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn metrics_query(&self, model_key: &str) -> QuerySpec {
        metrics_spec(model_key).stale_after(self.config.metrics_stale_after)
    }

    pub async fn health(&self) -> QueryState<HealthResponse> {
        self.queries.refetch(&health_spec()).await
    }

    /// Keep the health slot refreshed on the configured interval.
    pub fn watch_health(&self) -> PollHandle {
        self.queries
            .poll(health_spec(), self.config.health_poll_interval)
    }

    pub fn health_indicator(&self) -> HealthIndicator {
        HealthIndicator::from_state(&self.queries.peek(&health_spec().key))
    }

    pub async fn models(&self) -> QueryState<ModelsResponse> {
        self.queries.fetch(&models_spec()).await
    }

    pub async fn metrics(&self, model_key: &str) -> QueryState<MetricsResponse> {
        self.queries.fetch(&self.metrics_query(model_key)).await
    }

    /// One metrics query per model, resolved concurrently. The result keeps
    /// the model-list order; each entry succeeds or fails on its own.
    pub async fn metrics_for(
        &self,
        models: &[ModelInfo],
    ) -> Vec<(ModelInfo, QueryState<MetricsResponse>)> {
        let specs: Vec<QuerySpec> = models.iter().map(|m| self.metrics_query(&m.key)).collect();
        let states = self.queries.fetch_all(&specs).await;
        models.iter().cloned().zip(states).collect()
    }

    /// Non-blocking variant of [`FraudApi::metrics_for`]; unresolved models
    /// come back loading.
    pub fn observe_metrics(
        &self,
        models: &[ModelInfo],
    ) -> Vec<(ModelInfo, QueryState<MetricsResponse>)> {
        let specs: Vec<QuerySpec> = models.iter().map(|m| self.metrics_query(&m.key)).collect();
        let states = self.queries.observe_all(&specs);
        models.iter().cloned().zip(states).collect()
    }

    pub async fn eda_training(&self) -> QueryState<EdaTrainingResponse> {
        self.queries.fetch(&eda_training_spec()).await
    }

    /// Upload datasets for scoring with the chosen model.
    pub async fn predict(
        &self,
        request: &PredictRequest,
        supports_threshold: bool,
        observer: Option<ProgressFn>,
    ) -> MutationState<PredictResponse> {
        let body = match request.to_body(supports_threshold) {
            Ok(body) => body,
            Err(err) => return MutationState::Failed(err),
        };
        info!(model = %request.model, "submitting prediction");
        let transport = Arc::clone(self.queries.transport());
        self.predict
            .run(|cancel| async move {
                let task = UploadTask::with_token(cancel);
                let value = task
                    .run(transport.as_ref(), PREDICT_PATH, body, observer)
                    .await?;
                decode(value)
            })
            .await
    }

    /// Ask for per-feature contributions behind the given rows.
    pub async fn explain(&self, request: &ExplainRequest) -> MutationState<ExplainResponse> {
        let body = match serde_json::to_value(request) {
            Ok(body) => body,
            Err(err) => return MutationState::Failed(err.into()),
        };
        let transport = Arc::clone(self.queries.transport());
        self.explain
            .run(|cancel: CancellationToken| async move {
                let value = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ApiError::Cancelled),
                    value = transport.request(ApiRequest::post_json(EXPLAIN_PATH, body)) => value,
                }?;
                decode(value)
            })
            .await
    }

    /// Upload datasets for profiling and return the full report.
    pub async fn profile(
        &self,
        files: &UploadFiles,
        observer: Option<ProgressFn>,
    ) -> MutationState<ProfileReport> {
        if let Err(err) = files.require_any() {
            return MutationState::Failed(err);
        }
        let body = files.append_to(MultipartBody::new());
        let transport = Arc::clone(self.queries.transport());
        self.profile
            .run(|cancel| async move {
                let task = UploadTask::with_token(cancel);
                let value = task
                    .run(transport.as_ref(), EDA_UPLOAD_PATH, body, observer)
                    .await?;
                decode(value)
            })
            .await
    }

    pub fn predict_slot(&self) -> &Mutation<PredictResponse> {
        &self.predict
    }

    pub fn explain_slot(&self) -> &Mutation<ExplainResponse> {
        &self.explain
    }

    pub fn profile_slot(&self) -> &Mutation<ProfileReport> {
        &self.profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged_only() -> UploadFiles {
        UploadFiles::new().with(FileField::Merged, "merged.csv", b"TransactionID\n1\n".to_vec())
    }

    #[test]
    fn metrics_query_disabled_without_model() {
        assert!(!metrics_spec("").enabled);
        let spec = metrics_spec("cat");
        assert!(spec.enabled);
        assert_eq!(spec.request.path, "/api/v1/metrics?model=cat");
        assert_eq!(spec.key, QueryKey::new(["metrics", "cat"]));
    }

    #[test]
    fn metrics_query_escapes_model_key() {
        let spec = metrics_spec("a&b c");
        assert_eq!(spec.request.path, "/api/v1/metrics?model=a%26b%20c");
        assert_eq!(spec.key, QueryKey::new(["metrics", "a&b c"]));
    }

    #[test]
    fn threshold_sent_only_when_supported() {
        let request = PredictRequest::new("xgb", merged_only()).threshold(0.3);
        let with = request.to_body(true).unwrap();
        assert_eq!(with.text_value("threshold"), Some("0.3"));
        let without = request.to_body(false).unwrap();
        assert_eq!(without.text_value("threshold"), None);
        assert_eq!(without.field_names(), vec!["model", "file_merged"]);
    }

    #[test]
    fn threshold_is_clamped_to_slider_range() {
        assert_eq!(PredictRequest::new("xgb", merged_only()).threshold(0.99).threshold, 0.95);
        assert_eq!(PredictRequest::new("xgb", merged_only()).threshold(0.0).threshold, 0.05);
    }

    #[test]
    fn submission_without_files_is_rejected_locally() {
        let err = PredictRequest::new("xgb", UploadFiles::new())
            .to_body(true)
            .unwrap_err();
        assert!(matches!(err, ApiError::Invalid(_)));
    }

    #[test]
    fn files_are_sent_in_form_order() {
        let files = UploadFiles::new()
            .with(FileField::Identity, "id.csv", vec![1])
            .with(FileField::Transaction, "tx.csv", vec![2])
            .with(FileField::Identity, "id2.csv", vec![3]);
        let body = files.append_to(MultipartBody::new());
        assert_eq!(body.field_names(), vec!["file_transaction", "file_identity"]);
    }

    #[test]
    fn health_indicator_needs_ok_status_and_no_error() {
        let mut state = QueryState::idle();
        assert!(!HealthIndicator::from_state(&state).online);
        state.data = Some(HealthResponse { status: "ok".into() });
        assert!(HealthIndicator::from_state(&state).online);
        state.is_error = true;
        assert_eq!(HealthIndicator::from_state(&state).label(), "Offline");
    }
}
