//! Scoring Pipeline
//!
//! Raw record → imputed base → derived → vector → prediction / explanation.

use crate::backend::{ExplainerBackend, ModelBackend};
use crate::engine::{PredictionAdapter, PredictionResult, RiskTier};
use crate::explain::{ExplanationAdapter, ExplanationResult};
use crate::policy::InvocationPolicy;
use crate::response::Envelope;
use crate::PipelineError;
use feature_engine::{FeatureRegistry, FeatureVector, ImportanceTable, NamedValues, RawInputRecord};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_TOP_FACTORS: usize = 5;

/// A globally important feature with this record's value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopFactor {
    pub feature: String,
    pub display_name: String,
    pub importance: f64,
    pub value: f64,
}

/// Prediction plus the inputs that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub prediction: PredictionResult,
    pub risk_level: RiskTier,
    /// Follow-up suggested for the risk tier
    pub recommendation: &'static str,
    pub base_inputs: NamedValues,
    pub derived_features: NamedValues,
    pub imputed_fields: Vec<String>,
    pub top_factors: Vec<TopFactor>,
}

/// Shared, read-only scoring service for one trained model
pub struct ScoringPipeline<B> {
    registry: Arc<FeatureRegistry>,
    importance: Arc<ImportanceTable>,
    predictor: PredictionAdapter<B>,
    explainer: ExplanationAdapter<B>,
    top_factor_count: usize,
}

impl<B: ModelBackend + ExplainerBackend> ScoringPipeline<B> {
    /// Pipeline with no importance table and five top factors
    pub fn new(registry: Arc<FeatureRegistry>, backend: Arc<B>, policy: InvocationPolicy) -> Self {
        info!(
            "Scoring pipeline ready: {} features, backend {}",
            registry.schema().len(),
            backend.name()
        );

        Self {
            registry,
            importance: Arc::new(ImportanceTable::default()),
            predictor: PredictionAdapter::new(Arc::clone(&backend), policy.clone()),
            explainer: ExplanationAdapter::new(backend, policy),
            top_factor_count: DEFAULT_TOP_FACTORS,
        }
    }

    /// Global importance used for top factors
    pub fn with_importance(mut self, importance: Arc<ImportanceTable>) -> Self {
        self.importance = importance;
        self
    }

    /// How many top factors each prediction reports
    pub fn with_top_factor_count(mut self, count: usize) -> Self {
        self.top_factor_count = count;
        self
    }

    /// Feature registry shared by every request
    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn importance(&self) -> &ImportanceTable {
        &self.importance
    }

    /// Name of the model backend
    pub fn backend_name(&self) -> &str {
        self.predictor.backend().name()
    }

    /// Predict one record
    pub async fn score(&self, raw: &RawInputRecord) -> Result<ScoredRecord, PipelineError> {
        let prepared = self.registry.prepare(raw)?;
        let prediction = self.predictor.predict(&prepared.vector).await?;
        let risk_level = prediction.risk_tier();

        debug!(
            "Scored record: class={} risk={}",
            prediction.predicted_class,
            risk_level.as_str()
        );

        Ok(ScoredRecord {
            prediction,
            risk_level,
            recommendation: risk_level.recommended_action(),
            top_factors: self.top_factors(&prepared.vector),
            imputed_fields: prepared.imputed().to_vec(),
            base_inputs: prepared.base.values().clone(),
            derived_features: prepared.derived.values().clone(),
        })
    }

    /// Attribute one record's prediction to its features
    pub async fn explain(&self, raw: &RawInputRecord) -> Result<ExplanationResult, PipelineError> {
        let prepared = self.registry.prepare(raw)?;
        let explanation = self
            .explainer
            .explain(&prepared.vector, self.registry.schema())
            .await?;
        Ok(explanation)
    }

    /// Predict one record into a response envelope
    pub async fn predict_envelope(&self, raw: &RawInputRecord) -> Envelope<ScoredRecord> {
        Envelope::from_result(self.score(raw).await)
    }

    /// Explain one record into a response envelope
    pub async fn explain_envelope(&self, raw: &RawInputRecord) -> Envelope<ExplanationResult> {
        Envelope::from_result(self.explain(raw).await)
    }

    fn top_factors(&self, vector: &FeatureVector) -> Vec<TopFactor> {
        self.importance
            .top(self.top_factor_count)
            .iter()
            .filter_map(|entry| {
                vector.get(&entry.feature).map(|value| TopFactor {
                    feature: entry.feature.clone(),
                    display_name: entry.display_name.clone(),
                    importance: entry.importance,
                    value,
                })
            })
            .collect()
    }
}
