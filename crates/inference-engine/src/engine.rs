//! Prediction Invocation Adapter

use crate::backend::{ModelBackend, RawPrediction};
use crate::policy::InvocationPolicy;
use crate::{BackendError, InferenceError};
use feature_engine::FeatureVector;
use metrics::histogram;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Allowed deviation of `p0 + p1` from one
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Delinquency risk band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    /// Band a delinquency probability at 0.33 / 0.67
    pub fn from_probability(probability: f64) -> Self {
        if probability >= 0.67 {
            RiskTier::High
        } else if probability >= 0.33 {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    /// Lowercase tier name
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }

    /// Suggested follow-up for the account
    pub fn recommended_action(&self) -> &'static str {
        match self {
            RiskTier::Low => "Eligible for standard credit limits",
            RiskTier::Medium => "Monitor repayment and cap new loan amounts",
            RiskTier::High => "Restrict new loans and prioritise collection outreach",
        }
    }
}

/// Normalized binary prediction.
///
/// Class 1 is "repaid within five days"; class 0 is the delinquent outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_class: u8,
    pub probability_class_0: f64,
    pub probability_class_1: f64,
}

impl PredictionResult {
    /// Validate raw model output against the result invariants
    pub fn from_raw(raw: RawPrediction) -> Result<Self, BackendError> {
        if !raw.success {
            return Err(BackendError::Reported(
                raw.error.unwrap_or_else(|| "model reported failure without a message".to_string()),
            ));
        }

        let class = raw
            .prediction
            .ok_or_else(|| BackendError::Malformed("missing 'prediction'".to_string()))?;
        let p0 = probability(raw.probability_class_0, "probability_class_0")?;
        let p1 = probability(raw.probability_class_1, "probability_class_1")?;

        let predicted_class = match class {
            0 => 0u8,
            1 => 1u8,
            other => {
                return Err(BackendError::Malformed(format!(
                    "predicted class {} is not binary",
                    other
                )))
            }
        };

        if (p0 + p1 - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(BackendError::Malformed(format!(
                "probabilities sum to {}, not 1",
                p0 + p1
            )));
        }

        let argmax_disagrees = (predicted_class == 0 && p1 > p0) || (predicted_class == 1 && p0 > p1);
        if argmax_disagrees {
            return Err(BackendError::Malformed(format!(
                "predicted class {} is not the most probable (p0={}, p1={})",
                predicted_class, p0, p1
            )));
        }

        Ok(Self {
            predicted_class,
            probability_class_0: p0,
            probability_class_1: p1,
        })
    }

    /// Probability of the delinquent outcome
    pub fn delinquency_probability(&self) -> f64 {
        self.probability_class_0
    }

    /// Risk tier of the delinquency probability
    pub fn risk_tier(&self) -> RiskTier {
        RiskTier::from_probability(self.delinquency_probability())
    }
}

fn probability(value: Option<f64>, field: &str) -> Result<f64, BackendError> {
    let value = value.ok_or_else(|| BackendError::Malformed(format!("missing '{}'", field)))?;
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(BackendError::Malformed(format!("{} = {} is not a probability", field, value)));
    }
    Ok(value)
}

/// Calls the model backend and normalizes its output
pub struct PredictionAdapter<B> {
    backend: Arc<B>,
    policy: InvocationPolicy,
}

impl<B> Clone for PredictionAdapter<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            policy: self.policy.clone(),
        }
    }
}

impl<B: ModelBackend> PredictionAdapter<B> {
    pub fn new(backend: Arc<B>, policy: InvocationPolicy) -> Self {
        Self { backend, policy }
    }

    /// Backend this adapter calls
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run the model on one vector. Failures are never retried here.
    pub async fn predict(&self, vector: &FeatureVector) -> Result<PredictionResult, InferenceError> {
        let start = std::time::Instant::now();

        let result = self
            .policy
            .invoke(self.backend.infer(vector))
            .await
            .and_then(PredictionResult::from_raw);

        let elapsed = start.elapsed();
        histogram!("backend_latency_ms", "operation" => "predict").record(elapsed.as_secs_f64() * 1000.0);

        let latency_ms = elapsed.as_millis() as u64;
        match &result {
            Ok(prediction) => debug!(
                "Prediction from {}: class={} p0={:.4} ({}ms)",
                self.backend.name(),
                prediction.predicted_class,
                prediction.probability_class_0,
                latency_ms
            ),
            Err(e) => warn!("Prediction from {} failed after {}ms: {}", self.backend.name(), latency_ms, e),
        }

        result.map_err(InferenceError::PredictionUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use feature_engine::{FeatureRegistry, RawInputRecord};
    use std::time::Duration;

    fn raw(class: i64, p0: f64, p1: f64) -> RawPrediction {
        RawPrediction {
            success: true,
            prediction: Some(class),
            probability_class_0: Some(p0),
            probability_class_1: Some(p1),
            error: None,
        }
    }

    fn vector() -> FeatureVector {
        FeatureRegistry::telecom()
            .unwrap()
            .prepare(&RawInputRecord::new())
            .unwrap()
            .vector
    }

    #[test]
    fn test_valid_raw_prediction() {
        let result = PredictionResult::from_raw(raw(1, 0.2, 0.8)).unwrap();
        assert_eq!(result.predicted_class, 1);
        assert_eq!(result.risk_tier(), RiskTier::Low);
    }

    #[test]
    fn test_malformed_raw_predictions() {
        assert!(matches!(
            PredictionResult::from_raw(raw(2, 0.5, 0.5)),
            Err(BackendError::Malformed(_))
        ));
        assert!(matches!(
            PredictionResult::from_raw(raw(0, 0.7, 0.7)),
            Err(BackendError::Malformed(_))
        ));
        assert!(matches!(
            PredictionResult::from_raw(raw(1, 0.9, 0.1)),
            Err(BackendError::Malformed(_))
        ));
        assert!(matches!(
            PredictionResult::from_raw(raw(0, 1.5, -0.5)),
            Err(BackendError::Malformed(_))
        ));

        let mut missing = raw(0, 0.6, 0.4);
        missing.probability_class_1 = None;
        assert!(PredictionResult::from_raw(missing).is_err());
    }

    #[test]
    fn test_reported_failure() {
        let failed = RawPrediction {
            success: false,
            prediction: None,
            probability_class_0: None,
            probability_class_1: None,
            error: Some("feature names mismatch".to_string()),
        };
        assert_eq!(
            PredictionResult::from_raw(failed),
            Err(BackendError::Reported("feature names mismatch".to_string()))
        );
    }

    #[test]
    fn test_tie_accepts_either_class() {
        assert!(PredictionResult::from_raw(raw(0, 0.5, 0.5)).is_ok());
        assert!(PredictionResult::from_raw(raw(1, 0.5, 0.5)).is_ok());
    }

    #[test]
    fn test_risk_tiers() {
        assert_eq!(RiskTier::from_probability(0.1), RiskTier::Low);
        assert_eq!(RiskTier::from_probability(0.33), RiskTier::Medium);
        assert_eq!(RiskTier::from_probability(0.66), RiskTier::Medium);
        assert_eq!(RiskTier::from_probability(0.67), RiskTier::High);
    }

    #[tokio::test]
    async fn test_predict_is_deterministic() {
        let backend = Arc::new(MockBackend::new(-0.5).with_weight("loan_frequency_30d", 4.0));
        let adapter = PredictionAdapter::new(backend, InvocationPolicy::default());
        let vector = vector();

        let first = adapter.predict(&vector).await.unwrap();
        let second = adapter.predict(&vector).await.unwrap();
        assert_eq!(first, second);
        assert!((first.probability_class_0 + first.probability_class_1 - 1.0).abs() <= PROBABILITY_TOLERANCE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_prediction_unavailable() {
        let backend = Arc::new(MockBackend::new(0.0).with_delay(Duration::from_secs(10)));
        let adapter = PredictionAdapter::new(backend, InvocationPolicy::new(Duration::from_millis(100)));

        let err = adapter.predict(&vector()).await.unwrap_err();
        assert_eq!(err, InferenceError::PredictionUnavailable(BackendError::Timeout(100)));
    }

    #[tokio::test]
    async fn test_backend_failure_is_prediction_unavailable() {
        let adapter = PredictionAdapter::new(Arc::new(MockBackend::failing()), InvocationPolicy::default());
        let err = adapter.predict(&vector()).await.unwrap_err();
        assert!(matches!(err, InferenceError::PredictionUnavailable(_)));
    }
}
