//! Service configuration
//!
//! Layered as built-in defaults, then an optional TOML file, then
//! `RISK_DASHBOARD__SECTION__KEY` environment variables.

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Config file read when `RISK_DASHBOARD_CONFIG` is not set
pub const DEFAULT_CONFIG_PATH: &str = "config/risk-dashboard.toml";

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "RISK_DASHBOARD_CONFIG";

const ENV_PREFIX: &str = "RISK_DASHBOARD";

/// Log output style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Which model backend to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// External interpreter running the trained model
    Subprocess,
    /// In-process logistic stand-in
    Mock,
}

/// HTTP listener
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub listen_addr: String,
}

/// Logging output
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    pub format: LogFormat,
}

/// Feature definition and training artifacts
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureSettings {
    /// Definition file; the bundled telecom definition when unset
    pub definition: Option<PathBuf>,
    /// Training-set medians overriding the definition's
    pub medians: Option<PathBuf>,
    /// Global feature importance exported at training time
    pub importance: Option<PathBuf>,
    pub top_factors: usize,
}

/// Model backend and invocation limits
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub interpreter: PathBuf,
    pub script: PathBuf,
    pub timeout_ms: u64,
    /// 0 means unlimited
    pub max_concurrency: usize,
    pub batch_chunk_size: usize,
    pub mock_bias: f64,
    /// Per-feature weights for the mock backend
    #[serde(default)]
    pub mock_weights: HashMap<String, f64>,
}

impl BackendSettings {
    /// Per-call backend timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub features: FeatureSettings,
    pub backend: BackendSettings,
}

impl Settings {
    /// Load from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path, Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
    }

    /// Load with an explicit file and environment source
    pub fn load_from(path: &str, environment: Environment) -> Result<Self, ConfigError> {
        let settings: Self = Config::builder()
            .set_default("server.listen_addr", "0.0.0.0:8080")?
            .set_default("logging.format", "pretty")?
            .set_default("features.top_factors", 5)?
            .set_default("backend.kind", "subprocess")?
            .set_default("backend.interpreter", "python3")?
            .set_default("backend.script", "model/predict.py")?
            .set_default("backend.timeout_ms", 30_000)?
            .set_default("backend.max_concurrency", 0)?
            .set_default("backend.batch_chunk_size", 32)?
            .set_default("backend.mock_bias", 0.0)?
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        if settings.backend.timeout_ms == 0 {
            return Err(ConfigError::Message("backend.timeout_ms must be greater than zero".to_string()));
        }
        Ok(settings)
    }
}
