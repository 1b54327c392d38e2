use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON scalar that the service sends as either a number or a string
/// (transaction ids, predicted labels).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Text(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub trained_at: String,
    #[serde(default)]
    pub supports_threshold: bool,
    #[serde(default)]
    pub supports_explain: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}

impl ModelsResponse {
    pub fn find(&self, key: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.key == key)
    }

    /// Case-insensitive match on key or display name.
    pub fn search(&self, query: &str) -> Vec<&ModelInfo> {
        let query_lower = query.to_lowercase();
        self.models
            .iter()
            .filter(|m| {
                m.key.to_lowercase().contains(&query_lower)
                    || m.name.to_lowercase().contains(&query_lower)
            })
            .collect()
    }

    pub fn supports_threshold(&self, key: &str) -> bool {
        self.find(key).is_some_and(|m| m.supports_threshold)
    }
}

/// Evaluation scores for one model. Every field may be missing; consumers
/// read absent values as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roc_auc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_auc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recall: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f1: Option<f64>,
}

/// Metric names in the order the comparison views list them.
pub const METRIC_NAMES: [&str; 5] = ["roc_auc", "pr_auc", "precision", "recall", "f1"];

impl MetricSet {
    pub fn roc_auc(&self) -> f64 {
        self.roc_auc.unwrap_or(0.0)
    }

    pub fn pr_auc(&self) -> f64 {
        self.pr_auc.unwrap_or(0.0)
    }

    pub fn precision(&self) -> f64 {
        self.precision.unwrap_or(0.0)
    }

    pub fn recall(&self) -> f64 {
        self.recall.unwrap_or(0.0)
    }

    pub fn f1(&self) -> f64 {
        self.f1.unwrap_or(0.0)
    }

    /// Look a metric up by its wire name, absent or unknown reading as zero.
    pub fn get(&self, name: &str) -> f64 {
        match name {
            "roc_auc" => self.roc_auc(),
            "pr_auc" => self.pr_auc(),
            "precision" => self.precision(),
            "recall" => self.recall(),
            "f1" => self.f1(),
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrCurve {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Curves {
    #[serde(default)]
    pub roc: Option<RocCurve>,
    #[serde(default)]
    pub pr: Option<PrCurve>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tn: u64,
    pub fp: u64,
    #[serde(rename = "fn")]
    pub fn_: u64,
    pub tp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatasetSizes {
    pub total: u64,
    pub fraud: u64,
    pub non_fraud: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    #[serde(default)]
    pub fraud_rate: Option<f64>,
    #[serde(default)]
    pub dataset_sizes: Option<DatasetSizes>,
    #[serde(default)]
    pub sampling_ratio: Option<f64>,
    #[serde(default)]
    pub trained_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsResponse {
    #[serde(default)]
    pub metrics: MetricSet,
    #[serde(default)]
    pub curves: Option<Curves>,
    #[serde(default)]
    pub confusion_matrix: Option<ConfusionMatrix>,
    #[serde(default)]
    pub feature_importance: Option<Vec<FeatureImportance>>,
    #[serde(default)]
    pub training_stats: Option<TrainingStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingCount {
    pub feature: String,
    pub missing: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub bin: String,
    pub count: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingDistributions {
    #[serde(default)]
    pub transaction_amount: Option<Vec<HistogramBin>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyFraudRate {
    pub hour: u32,
    pub fraud_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdaTrainingResponse {
    #[serde(default)]
    pub missingness: Option<Vec<MissingCount>>,
    #[serde(default)]
    pub distributions: Option<TrainingDistributions>,
    #[serde(default)]
    pub fraud_by_hour: Option<Vec<HourlyFraudRate>>,
}

impl EdaTrainingResponse {
    /// Top `limit` features by the order the service reported them.
    pub fn top_missing(&self, limit: usize) -> &[MissingCount] {
        match &self.missingness {
            Some(items) => &items[..items.len().min(limit)],
            None => &[],
        }
    }

    /// Hourly fraud rate as histogram bins, rates rounded to 4 places.
    pub fn fraud_by_hour_bins(&self) -> Vec<HistogramBin> {
        self.fraud_by_hour
            .iter()
            .flatten()
            .map(|h| HistogramBin {
                bin: h.hour.to_string(),
                count: (h.fraud_rate * 10_000.0).round() / 10_000.0,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictSummary {
    pub total: u64,
    pub fraud_count: u64,
    pub non_fraud_count: u64,
    pub fraud_rate: f64,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

/// One scored transaction. Field order is the export column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub row_id: String,
    #[serde(
        rename = "TransactionID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transaction_id: Option<Scalar>,
    pub proba: f64,
    pub pred_label: Scalar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub summary: PredictSummary,
    #[serde(default)]
    pub rows: Vec<PredictionRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainRequest {
    pub model: String,
    pub row_ids: Vec<String>,
    pub top_k: u32,
}

/// Number of contributing features requested per explanation.
pub const DEFAULT_TOP_K: u32 = 8;

impl ExplainRequest {
    pub fn single(model: &str, row_id: &str) -> Self {
        ExplainRequest {
            model: model.to_string(),
            row_ids: vec![row_id.to_string()],
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub category: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleField {
    pub label: String,
    pub value: Option<Scalar>,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub row_id: String,
    pub proba: f64,
    pub pred_label: Scalar,
    #[serde(default)]
    pub positives: Vec<FeatureContribution>,
    #[serde(default)]
    pub negatives: Vec<FeatureContribution>,
    #[serde(default)]
    pub category_breakdown: Option<Vec<CategoryShare>>,
    #[serde(default)]
    pub simple_fields: Option<Vec<SimpleField>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainResponse {
    #[serde(default)]
    pub explanations: Vec<Explanation>,
}

impl ExplainResponse {
    pub fn for_row(&self, row_id: &str) -> Option<&Explanation> {
        self.explanations.iter().find(|e| e.row_id == row_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub field: String,
    pub filename: String,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub rows: u64,
    pub columns: u64,
    pub numeric_columns: u64,
    pub categorical_columns: u64,
    pub binary_columns: u64,
    pub transaction_id_present: bool,
    pub dataset_type: Option<String>,
    pub upload_timestamp: String,
    pub file_size_bytes: u64,
    #[serde(default)]
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingFeature {
    pub feature: String,
    pub missing: f64,
    pub missing_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileMissingness {
    pub overall_missing_pct: f64,
    pub rows_with_missing_pct: f64,
    #[serde(default)]
    pub top: Vec<MissingFeature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaAlignment {
    #[serde(default)]
    pub present_required: Vec<String>,
    #[serde(default)]
    pub missing_required: Vec<String>,
    #[serde(default)]
    pub created_columns: Vec<String>,
    #[serde(default)]
    pub ignored_columns: Vec<String>,
    pub final_feature_count: u64,
    #[serde(default)]
    pub unseen_categories: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub outliers: u64,
}

/// Numeric profile of one uploaded column, keyed by column name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummaryRow {
    pub row_id: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub outliers: u64,
}

/// Profiling report for an uploaded dataset. Sections the client does not
/// interpret are kept in `extra` so an export carries the whole report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileReport {
    pub summary: ProfileSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missingness: Option<ProfileMissingness>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributions: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_alignment: Option<SchemaAlignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicates: Option<Value>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileReport {
    /// Per-column numeric stats in report order; null entries are skipped.
    pub fn numeric_summary_rows(&self) -> Vec<NumericSummaryRow> {
        let Some(stats) = &self.stats else {
            return Vec::new();
        };
        stats
            .iter()
            .filter_map(|(column, value)| {
                let parsed: NumericStats = serde_json::from_value(value.clone()).ok()?;
                Some(NumericSummaryRow {
                    row_id: column.clone(),
                    min: parsed.min,
                    max: parsed.max,
                    mean: parsed.mean,
                    median: parsed.median,
                    std: parsed.std,
                    outliers: parsed.outliers,
                })
            })
            .collect()
    }

    pub fn uploaded_file_names(&self) -> String {
        let names: Vec<&str> = self
            .summary
            .files
            .iter()
            .map(|f| f.filename.as_str())
            .collect();
        if names.is_empty() {
            "-".to_string()
        } else {
            names.join(", ")
        }
    }
}
