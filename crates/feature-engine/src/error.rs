//! Feature Pipeline Error Types

use thiserror::Error;

/// Errors raised while preparing a feature vector
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    /// Feature definition or imputation table missing or malformed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Derived feature formula references something it cannot see
    #[error("Invalid derived feature '{feature}': {reason}")]
    Spec { feature: String, reason: String },

    /// Caller omitted a field that has no fallback value
    #[error("No imputation value available for omitted field '{field}'")]
    Data { field: String },

    /// Base/derived records do not cover the schema
    #[error("Field '{field}' could not be assembled: {reason}")]
    Assembly { field: String, reason: String },

    /// Caller supplied input that could not be read at all
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl FeatureError {
    /// Errors that must stop the service from starting
    pub fn is_fatal(&self) -> bool {
        matches!(self, FeatureError::Configuration(_) | FeatureError::Spec { .. })
    }

    pub(crate) fn spec(feature: &str, reason: impl Into<String>) -> Self {
        FeatureError::Spec {
            feature: feature.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn assembly(field: &str, reason: impl Into<String>) -> Self {
        FeatureError::Assembly {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for FeatureError {
    fn from(err: std::io::Error) -> Self {
        FeatureError::Configuration(err.to_string())
    }
}
