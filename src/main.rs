//! Loan Risk Service - Main Entry Point
//!
//! Loads the trained model artifact, opens the database and serves the
//! scoring API until interrupted.

use anyhow::{Context, Result};
use chrono::Utc;
use loan_risk_service::{
    auth::AuthService,
    config::{AppConfig, LoggingConfig},
    metrics::{MetricsReporter, ServiceMetrics},
    models::{InferenceEngine, ModelArtifact},
    server::{self, AppState},
    store::Store,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    info!("Starting Loan Risk Service");

    // The service cannot answer anything useful without a model
    let artifact = ModelArtifact::load(&config.model.artifact_path, config.model.onnx_threads)
        .context("Failed to load model artifact")?;
    let engine = Arc::new(InferenceEngine::new(artifact));
    info!(
        features = engine.artifact().extractor().feature_count(),
        classifier = engine.artifact().classifier().name(),
        "Inference engine initialized"
    );

    let store = Store::open(&config.database.path)?;
    let purged = store.purge_expired_sessions(Utc::now()).await?;
    if purged > 0 {
        info!(purged = purged, "Removed expired sessions");
    }

    let auth = AuthService::new(store.clone(), config.auth.token_ttl_minutes);
    let metrics = Arc::new(ServiceMetrics::new());

    let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
    tokio::spawn(reporter.start());

    let bind_addr = config.server.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    let state = AppState::new(engine, store, auth, metrics.clone());
    server::serve(listener, state, shutdown_signal()).await?;

    info!("Loan Risk Service shutting down");
    metrics.log_summary();

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("loan_risk_service={}", logging.level).parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
