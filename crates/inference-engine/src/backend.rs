//! Model backend collaborator interface

use crate::BackendError;
use feature_engine::FeatureVector;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Raw prediction as reported by the model process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPrediction {
    pub success: bool,
    #[serde(default)]
    pub prediction: Option<i64>,
    #[serde(default)]
    pub probability_class_0: Option<f64>,
    #[serde(default)]
    pub probability_class_1: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One attribution as reported by the explainer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAttribution {
    pub feature: String,
    pub shap_value: f64,
}

/// Raw explanation as reported by the explainer process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExplanation {
    pub success: bool,
    #[serde(default)]
    pub base_value: Option<f64>,
    #[serde(default)]
    pub explanations: Vec<RawAttribution>,
    /// Model output the attributions should add up to, when the explainer reports it
    #[serde(default)]
    pub model_output: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The trained classifier, wherever it runs
pub trait ModelBackend: Send + Sync {
    /// Short name for logs and health output
    fn name(&self) -> &str;

    fn infer(&self, vector: &FeatureVector) -> impl Future<Output = Result<RawPrediction, BackendError>> + Send;
}

/// Per-feature attribution routine for the same model
pub trait ExplainerBackend: Send + Sync {
    fn explain(&self, vector: &FeatureVector) -> impl Future<Output = Result<RawExplanation, BackendError>> + Send;
}
