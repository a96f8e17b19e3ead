//! Inference Engine
//!
//! Invokes the external delinquency model and explainer through an injected
//! backend, and normalizes their output into strict result types.

mod backend;
mod batcher;
mod engine;
mod explain;
mod mock;
mod pipeline;
mod policy;
mod response;
mod subprocess;

pub use backend::{ExplainerBackend, ModelBackend, RawAttribution, RawExplanation, RawPrediction};
pub use batcher::BatchPredictor;
pub use engine::{PredictionAdapter, PredictionResult, RiskTier, PROBABILITY_TOLERANCE};
pub use explain::{Attribution, ExplanationAdapter, ExplanationResult};
pub use mock::MockBackend;
pub use pipeline::{ScoredRecord, ScoringPipeline, TopFactor};
pub use policy::InvocationPolicy;
pub use response::{BatchResponse, BatchRow, Envelope};
pub use subprocess::SubprocessBackend;

use feature_engine::FeatureError;
use thiserror::Error;

/// Failures talking to the external model or explainer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("Failed to launch model process: {0}")]
    Spawn(String),
    #[error("Model process exited with status {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
    #[error("Model call timed out after {0}ms")]
    Timeout(u64),
    #[error("Malformed model output: {0}")]
    Malformed(String),
    #[error("Model reported failure: {0}")]
    Reported(String),
    #[error("Concurrency limiter is closed")]
    LimiterClosed,
}

/// Errors during inference
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    #[error("Prediction unavailable: {0}")]
    PredictionUnavailable(BackendError),
    #[error("Explanation unavailable: {0}")]
    ExplanationUnavailable(BackendError),
}

/// Anything that can go wrong scoring one record
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl PipelineError {
    /// Whether the caller may reasonably try the same request again
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Inference(_))
    }
}
