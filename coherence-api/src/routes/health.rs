//! Health endpoints, unauthenticated.
//!
//! - `GET /health/ping`: plain `pong`
//! - `GET /health/live`: the process is up
//! - `GET /health/ready`: the cache store answers; 503 otherwise

use std::time::Instant;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::state::{ApiEngine, AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Cache store probe result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheProbe {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tombstones: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `GET /health/ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub entity_types: usize,
    pub cache: CacheProbe,
}

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn liveness() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": HealthStatus::Healthy }))
}

pub async fn readiness(
    State(engine): State<ApiEngine>,
    State(started): State<Instant>,
) -> (StatusCode, Json<Readiness>) {
    let cache = probe_cache(&engine).await;
    let status = cache.status;
    let body = Readiness {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: started.elapsed().as_secs(),
        entity_types: engine.schemas().len(),
        cache,
    };

    let code = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(body))
}

async fn probe_cache(engine: &ApiEngine) -> CacheProbe {
    let start = Instant::now();
    let result = engine.store().stats().await;
    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(stats) => CacheProbe {
            status: HealthStatus::Healthy,
            latency_ms,
            records: Some(stats.records),
            tombstones: Some(stats.tombstones),
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Cache store readiness probe failed");
            CacheProbe {
                status: HealthStatus::Unhealthy,
                latency_ms,
                records: None,
                tombstones: None,
                error: Some(e.to_string()),
            }
        }
    }
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_probe_omits_counts() -> Result<(), serde_json::Error> {
        let probe = CacheProbe {
            status: HealthStatus::Unhealthy,
            latency_ms: 3,
            records: None,
            tombstones: None,
            error: Some("MDB_PANIC".to_string()),
        };

        let json = serde_json::to_value(&probe)?;
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["error"], "MDB_PANIC");
        assert!(json.get("records").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_liveness_body() {
        let Json(body) = liveness().await;
        assert_eq!(body["status"], "healthy");
    }
}
