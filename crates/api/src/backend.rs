//! Backend selected at startup

use crate::settings::{BackendKind, BackendSettings};
use feature_engine::FeatureVector;
use inference_engine::{
    BackendError, ExplainerBackend, MockBackend, ModelBackend, RawExplanation, RawPrediction, SubprocessBackend,
};

/// The model backend the service was configured with
#[derive(Debug, Clone)]
pub enum Backend {
    Subprocess(SubprocessBackend),
    Mock(MockBackend),
}

impl Backend {
    /// Build the configured backend
    pub fn from_settings(settings: &BackendSettings) -> Self {
        match settings.kind {
            BackendKind::Subprocess => {
                Backend::Subprocess(SubprocessBackend::new(&settings.interpreter, &settings.script))
            }
            BackendKind::Mock => {
                Backend::Mock(MockBackend::new(settings.mock_bias).with_weights(settings.mock_weights.clone()))
            }
        }
    }
}

impl ModelBackend for Backend {
    fn name(&self) -> &str {
        match self {
            Backend::Subprocess(backend) => backend.name(),
            Backend::Mock(backend) => backend.name(),
        }
    }

    async fn infer(&self, vector: &FeatureVector) -> Result<RawPrediction, BackendError> {
        match self {
            Backend::Subprocess(backend) => backend.infer(vector).await,
            Backend::Mock(backend) => backend.infer(vector).await,
        }
    }
}

impl ExplainerBackend for Backend {
    async fn explain(&self, vector: &FeatureVector) -> Result<RawExplanation, BackendError> {
        match self {
            Backend::Subprocess(backend) => backend.explain(vector).await,
            Backend::Mock(backend) => backend.explain(vector).await,
        }
    }
}
