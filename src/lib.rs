pub mod api;
pub mod config;
pub mod display;
pub mod error;
pub mod export;
pub mod logging;
pub mod models;
pub mod prefs;
pub mod query;
pub mod rank;
pub mod table;
pub mod transport;
pub mod upload;

pub use api::{FileField, FraudApi, HealthIndicator, PredictRequest, UploadFiles};
pub use config::{ClientConfig, ConfigError};
pub use error::ApiError;
pub use export::{Artifact, ExportError, report_to_json, rows_to_csv};
pub use models::{MetricSet, ModelInfo, PredictionRow, ProfileReport};
pub use prefs::{FileBackend, MemoryBackend, PreferenceBackend, PreferenceStore, Theme};
pub use query::{QueryClient, QueryKey, QuerySpec, QueryState};
pub use rank::{Leaderboard, RankedModel, WeightVector, rank_models};
pub use table::{Column, Explorer, TableRow, TableView};
pub use transport::{ApiRequest, HttpTransport, MultipartBody, Transport};
pub use upload::{Mutation, MutationState, UploadPhase, UploadTask};
