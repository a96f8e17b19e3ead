//! Delinquency Risk Dashboard - Main Entry Point

use anyhow::Context;
use api::{create_router, init_logging, AppState, Backend, Settings};
use feature_engine::{FeatureRegistry, ImportanceTable, ImputationTable};
use inference_engine::{InvocationPolicy, ScoringPipeline};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    init_logging(settings.logging.format).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("=== Risk Dashboard v{} ===", env!("CARGO_PKG_VERSION"));

    let mut registry = match &settings.features.definition {
        Some(path) => FeatureRegistry::load(path)
            .with_context(|| format!("Failed to load feature definition {}", path.display()))?,
        None => FeatureRegistry::telecom().context("Bundled feature definition is invalid")?,
    };
    if let Some(path) = &settings.features.medians {
        let medians =
            ImputationTable::load(path).with_context(|| format!("Failed to load medians {}", path.display()))?;
        registry = registry.with_imputation(medians);
    }
    let registry = Arc::new(registry);

    let importance = match &settings.features.importance {
        Some(path) => ImportanceTable::load(path, registry.schema())
            .with_context(|| format!("Failed to load feature importance {}", path.display()))?,
        None => {
            warn!("No feature importance artifact configured");
            ImportanceTable::default()
        }
    };

    let mut policy = InvocationPolicy::new(settings.backend.timeout());
    if settings.backend.max_concurrency > 0 {
        info!("Limiting backend calls to {} at a time", settings.backend.max_concurrency);
        policy = policy.with_limiter(Arc::new(Semaphore::new(settings.backend.max_concurrency)));
    }

    let backend = Arc::new(Backend::from_settings(&settings.backend));
    let pipeline = ScoringPipeline::new(Arc::clone(&registry), backend, policy)
        .with_importance(Arc::new(importance))
        .with_top_factor_count(settings.features.top_factors);

    let mut state = AppState::new(Arc::new(pipeline)).with_batch_chunk_size(settings.backend.batch_chunk_size);
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => warn!("Metrics disabled: {}", e),
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = create_router(Arc::new(state)).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    );

    info!("Starting API server on {}", settings.server.listen_addr);
    let listener = tokio::net::TcpListener::bind(&settings.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.listen_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
