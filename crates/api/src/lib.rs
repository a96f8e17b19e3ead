//! Delinquency Risk Dashboard API Server
//!
//! REST API over the scoring pipeline: single, batch and CSV predictions,
//! explanations, schema and importance lookups.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use inference_engine::{BatchPredictor, Envelope, ScoringPipeline};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

mod backend;
mod routes;
pub mod settings;

pub use backend::Backend;
pub use settings::{BackendKind, LogFormat, Settings};

/// Application state shared across handlers
pub struct AppState {
    pub pipeline: Arc<ScoringPipeline<Backend>>,
    pub batch: BatchPredictor<Backend>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
    /// Present when the Prometheus recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// State with a default-sized batch predictor and no metrics
    pub fn new(pipeline: Arc<ScoringPipeline<Backend>>) -> Self {
        Self {
            batch: BatchPredictor::new(Arc::clone(&pipeline)),
            pipeline,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
            metrics: None,
        }
    }

    /// Rows scored concurrently per batch chunk
    pub fn with_batch_chunk_size(mut self, chunk_size: usize) -> Self {
        self.batch = self.batch.with_chunk_size(chunk_size);
        self
    }

    /// Serve `/metrics` from this handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Request-level failures; scoring failures travel inside a 200 envelope
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Metrics recorder is not installed")]
    MetricsDisabled,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MetricsDisabled => StatusCode::NOT_FOUND,
        };
        (status, Json(Envelope::<()>::failure(self.to_string()))).into_response()
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub backend: String,
    pub features: FeatureCounts,
    pub importance_loaded: bool,
}

/// Schema size reported by the health check
#[derive(Debug, Serialize)]
pub struct FeatureCounts {
    pub base: usize,
    pub derived: usize,
    pub total: usize,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/schema", get(routes::schema::get_schema))
        .route("/api/v1/features/importance", get(routes::schema::get_importance))
        .route("/api/v1/predict", post(routes::scoring::predict))
        .route("/api/v1/predict/batch", post(routes::scoring::predict_batch))
        .route("/api/v1/predict/csv", post(routes::scoring::predict_csv))
        .route("/api/v1/explain", post(routes::scoring::explain))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let schema = state.pipeline.registry().schema();

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        backend: state.pipeline.backend_name().to_string(),
        features: FeatureCounts {
            base: schema.base_count(),
            derived: schema.derived_count(),
            total: schema.len(),
        },
        importance_loaded: !state.pipeline.importance().is_empty(),
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .ok_or(ApiError::MetricsDisabled)
}

/// Initialize logging. `RUST_LOG` overrides the default filter.
pub fn init_logging(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,api=debug,tower_http=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
}
