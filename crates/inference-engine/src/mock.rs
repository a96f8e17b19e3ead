//! Deterministic in-process backend for development and tests

use crate::backend::{ExplainerBackend, ModelBackend, RawAttribution, RawExplanation, RawPrediction};
use crate::BackendError;
use feature_engine::FeatureVector;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Logistic model over named features.
///
/// `logit = bias + Σ weight · (value - baseline)`; attributions are the
/// individual terms, so they add up exactly to `logit - bias`.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    bias: f64,
    weights: HashMap<String, f64>,
    baselines: HashMap<String, f64>,
    delay: Option<Duration>,
    fail: bool,
}

impl MockBackend {
    /// Backend with only a bias term; every input scores the same
    pub fn new(bias: f64) -> Self {
        Self {
            bias,
            ..Default::default()
        }
    }

    /// Backend whose every call fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Weight applied to one feature
    pub fn with_weight(mut self, feature: &str, weight: f64) -> Self {
        self.weights.insert(feature.to_string(), weight);
        self
    }

    /// Merge several feature weights
    pub fn with_weights(mut self, weights: HashMap<String, f64>) -> Self {
        self.weights.extend(weights);
        self
    }

    /// Reference value a feature is compared against
    pub fn with_baseline(mut self, feature: &str, value: f64) -> Self {
        self.baselines.insert(feature.to_string(), value);
        self
    }

    /// Simulate a slow model
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn term(&self, feature: &str, value: f64) -> f64 {
        let weight = self.weights.get(feature).copied().unwrap_or(0.0);
        let baseline = self.baselines.get(feature).copied().unwrap_or(0.0);
        weight * (value - baseline)
    }

    fn logit(&self, vector: &FeatureVector) -> f64 {
        self.bias + vector.iter().map(|(name, value)| self.term(name, value)).sum::<f64>()
    }

    async fn simulate(&self) -> Result<(), BackendError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(BackendError::Spawn("mock backend configured to fail".to_string()));
        }
        Ok(())
    }
}

impl ModelBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn infer(&self, vector: &FeatureVector) -> Result<RawPrediction, BackendError> {
        self.simulate().await?;

        // Probability of class 1 (repaid)
        let p1 = 1.0 / (1.0 + (-self.logit(vector)).exp());
        let p0 = 1.0 - p1;
        debug!("Mock prediction p1={:.4}", p1);

        Ok(RawPrediction {
            success: true,
            prediction: Some(if p1 >= 0.5 { 1 } else { 0 }),
            probability_class_0: Some(p0),
            probability_class_1: Some(p1),
            error: None,
        })
    }
}

impl ExplainerBackend for MockBackend {
    async fn explain(&self, vector: &FeatureVector) -> Result<RawExplanation, BackendError> {
        self.simulate().await?;

        let explanations = vector
            .iter()
            .map(|(name, value)| RawAttribution {
                feature: name.to_string(),
                shap_value: self.term(name, value),
            })
            .collect();

        Ok(RawExplanation {
            success: true,
            base_value: Some(self.bias),
            explanations,
            model_output: Some(self.logit(vector)),
            error: None,
        })
    }
}
