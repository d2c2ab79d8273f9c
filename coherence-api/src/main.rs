//! Coherence API Server Entry Point
//!
//! Loads configuration and entity schemas, opens the cache store, starts the
//! reconciliation sweep, and serves the ingestion endpoint.

use std::sync::Arc;

use axum::Router;
use coherence_api::jobs::reconcile_task;
use coherence_api::telemetry::{init_tracing, CoherenceMetrics, TelemetryConfig};
use coherence_api::{
    build_engine, create_router, load_schemas, ApiConfig, ApiError, ApiReconciler, ApiResult, AppState,
    IngestHandler,
};
use coherence_core::CoherenceError;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let config = ApiConfig::from_env().map_err(CoherenceError::from)?;
    config.validate().map_err(CoherenceError::from)?;

    let schemas = load_schemas(&config.schema_path)?;
    let engine = build_engine(&config, schemas).await?;

    let metrics = Arc::new(CoherenceMetrics::new()?);
    let secret = config
        .webhook_secret
        .clone()
        .ok_or_else(|| ApiError::internal_error("COHERENCE_WEBHOOK_SECRET is not set"))?;
    let ingest = IngestHandler::new(engine.clone(), secret, metrics.clone());
    let state = AppState::new(engine.clone(), ingest, metrics.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = Arc::new(ApiReconciler::new(engine));
    let sweep = tokio::spawn(reconcile_task(
        reconciler,
        config.engine.sweep.clone(),
        metrics,
        shutdown_rx,
    ));

    let app: Router = create_router(state);

    let addr = config.bind_addr;
    tracing::info!(%addr, service = %telemetry_config.service_name, "Starting Coherence API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweep.await {
        tracing::warn!(error = %e, "Reconciliation sweep task did not exit cleanly");
    }

    Ok(())
}
