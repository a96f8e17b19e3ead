//! Explanation Adapter

use crate::backend::{ExplainerBackend, RawExplanation};
use crate::policy::InvocationPolicy;
use crate::{BackendError, InferenceError};
use feature_engine::{FeatureSchema, FeatureVector};
use metrics::histogram;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Allowed gap between `base_value + Σ attributions` and the reported model output
const ADDITIVITY_TOLERANCE: f64 = 1e-3;

/// Contribution of one feature to a single prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub feature: String,
    pub display_name: String,
    pub value: f64,
    pub shap_value: f64,
}

/// Attributions sorted by descending absolute contribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationResult {
    pub base_value: f64,
    pub explanations: Vec<Attribution>,
}

impl ExplanationResult {
    /// Validate raw explainer output against the vector it explains
    pub fn from_raw(
        raw: RawExplanation,
        vector: &FeatureVector,
        schema: &FeatureSchema,
    ) -> Result<Self, BackendError> {
        if !raw.success {
            return Err(BackendError::Reported(
                raw.error.unwrap_or_else(|| "explainer reported failure without a message".to_string()),
            ));
        }

        let base_value = raw
            .base_value
            .filter(|v| v.is_finite())
            .ok_or_else(|| BackendError::Malformed("missing or non-finite 'base_value'".to_string()))?;

        if raw.explanations.len() != vector.len() {
            return Err(BackendError::Malformed(format!(
                "expected {} attributions, got {}",
                vector.len(),
                raw.explanations.len()
            )));
        }

        let mut seen = HashSet::with_capacity(raw.explanations.len());
        let mut explanations = Vec::with_capacity(raw.explanations.len());
        for entry in raw.explanations {
            let value = vector
                .get(&entry.feature)
                .ok_or_else(|| BackendError::Malformed(format!("unknown feature '{}'", entry.feature)))?;
            if !seen.insert(entry.feature.clone()) {
                return Err(BackendError::Malformed(format!("feature '{}' attributed twice", entry.feature)));
            }
            if !entry.shap_value.is_finite() {
                return Err(BackendError::Malformed(format!(
                    "non-finite attribution for '{}'",
                    entry.feature
                )));
            }

            explanations.push(Attribution {
                display_name: schema.label(&entry.feature).to_string(),
                feature: entry.feature,
                value,
                shap_value: entry.shap_value,
            });
        }

        explanations.sort_by(|a, b| b.shap_value.abs().total_cmp(&a.shap_value.abs()));

        let result = Self {
            base_value,
            explanations,
        };

        if let Some(output) = raw.model_output {
            let reconstructed = result.base_value + result.attribution_sum();
            if (reconstructed - output).abs() > ADDITIVITY_TOLERANCE * output.abs().max(1.0) {
                warn!(
                    "Attributions do not add up: base + Σ = {:.6}, model output = {:.6}",
                    reconstructed, output
                );
            }
        }

        Ok(result)
    }

    /// Sum of every attribution
    pub fn attribution_sum(&self) -> f64 {
        self.explanations.iter().map(|a| a.shap_value).sum()
    }

    /// The `n` most influential features
    pub fn top(&self, n: usize) -> &[Attribution] {
        &self.explanations[..n.min(self.explanations.len())]
    }
}

/// Calls the explainer backend and enforces attribution ordering
pub struct ExplanationAdapter<B> {
    backend: Arc<B>,
    policy: InvocationPolicy,
}

impl<B> Clone for ExplanationAdapter<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            policy: self.policy.clone(),
        }
    }
}

impl<B: ExplainerBackend> ExplanationAdapter<B> {
    /// Adapter sharing `backend` under `policy`
    pub fn new(backend: Arc<B>, policy: InvocationPolicy) -> Self {
        Self { backend, policy }
    }

    /// Explain one vector; `schema` supplies display names
    pub async fn explain(
        &self,
        vector: &FeatureVector,
        schema: &FeatureSchema,
    ) -> Result<ExplanationResult, InferenceError> {
        let start = std::time::Instant::now();

        let result = self
            .policy
            .invoke(self.backend.explain(vector))
            .await
            .and_then(|raw| ExplanationResult::from_raw(raw, vector, schema));

        let elapsed = start.elapsed();
        histogram!("backend_latency_ms", "operation" => "explain").record(elapsed.as_secs_f64() * 1000.0);

        match &result {
            Ok(explanation) => debug!(
                "Explanation with {} attributions, base={:.4} ({}ms)",
                explanation.explanations.len(),
                explanation.base_value,
                elapsed.as_millis()
            ),
            Err(e) => warn!("Explanation failed after {}ms: {}", elapsed.as_millis(), e),
        }

        result.map_err(InferenceError::ExplanationUnavailable)
    }
}
