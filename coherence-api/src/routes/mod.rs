//! HTTP Routes Module
//!
//! Includes:
//! - Change ingestion (`POST /v1/changes`)
//! - Health check endpoints (Kubernetes-compatible)
//! - Prometheus scrape endpoint (`GET /metrics`)

pub mod health;
pub mod ingest;

use axum::{routing::get, Router};

use crate::state::AppState;
use crate::telemetry::metrics_handler;

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/v1", ingest::create_router())
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
