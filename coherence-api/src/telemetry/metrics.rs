//! Prometheus Metrics Definitions
//!
//! Metrics live on an explicit [`Registry`] owned by application state.
//! Engine outcome counters are mirrored into gauges at scrape time; sweep
//! and ingestion counters are incremented as events happen.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use coherence_storage::{EngineStatsSnapshot, NotificationAction, SweepReport};
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Container for all Coherence metrics.
#[derive(Clone)]
pub struct CoherenceMetrics {
    registry: Registry,

    /// Engine outcome counters - labels: outcome
    pub cache_outcomes: IntGaugeVec,

    /// Sweep passes - labels: status (completed/partial/cancelled/skipped/failed)
    pub sweep_runs_total: IntCounterVec,

    /// Entities handled by sweeps - labels: kind
    pub sweep_entities_total: IntCounterVec,

    /// Change notifications - labels: action, status
    pub notifications_total: IntCounterVec,
}

fn registration_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl CoherenceMetrics {
    /// Create all metrics and register them on a fresh registry.
    pub fn new() -> ApiResult<Self> {
        let registry = Registry::new_custom(Some("coherence".to_string()), None)
            .map_err(|e| registration_error("registry", e))?;

        let cache_outcomes = IntGaugeVec::new(
            Opts::new("cache_outcomes", "Cache-aside operation outcomes since startup"),
            &["outcome"],
        )
        .map_err(|e| registration_error("cache_outcomes", e))?;

        let sweep_runs_total = IntCounterVec::new(
            Opts::new("sweep_runs_total", "Total reconciliation sweep passes"),
            &["status"],
        )
        .map_err(|e| registration_error("sweep_runs_total", e))?;

        let sweep_entities_total = IntCounterVec::new(
            Opts::new("sweep_entities_total", "Entities handled by reconciliation sweeps"),
            &["kind"],
        )
        .map_err(|e| registration_error("sweep_entities_total", e))?;

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Total change notifications received"),
            &["action", "status"],
        )
        .map_err(|e| registration_error("notifications_total", e))?;

        registry
            .register(Box::new(cache_outcomes.clone()))
            .map_err(|e| registration_error("cache_outcomes", e))?;
        registry
            .register(Box::new(sweep_runs_total.clone()))
            .map_err(|e| registration_error("sweep_runs_total", e))?;
        registry
            .register(Box::new(sweep_entities_total.clone()))
            .map_err(|e| registration_error("sweep_entities_total", e))?;
        registry
            .register(Box::new(notifications_total.clone()))
            .map_err(|e| registration_error("notifications_total", e))?;

        Ok(Self {
            registry,
            cache_outcomes,
            sweep_runs_total,
            sweep_entities_total,
            notifications_total,
        })
    }

    /// Copy engine counters into the outcome gauges.
    pub fn observe_engine(&self, stats: &EngineStatsSnapshot) {
        for (outcome, value) in stats.outcomes() {
            self.cache_outcomes
                .with_label_values(&[outcome])
                .set(i64::try_from(value).unwrap_or(i64::MAX));
        }
    }

    /// Record one finished sweep pass.
    pub fn record_sweep(&self, report: &SweepReport) {
        self.sweep_runs_total.with_label_values(&[report.status()]).inc();
        for (kind, count) in [
            ("scanned", report.scanned),
            ("expired_purged", report.expired_purged),
            ("suspected", report.suspected),
            ("existence_checks", report.existence_checks),
            ("confirmed_deleted", report.confirmed_deleted),
            ("false_positives", report.false_positives),
            ("upstream_calls", report.upstream_calls),
            ("errors", report.errors),
        ] {
            self.sweep_entities_total.with_label_values(&[kind]).inc_by(count);
        }
    }

    /// Record a sweep pass that returned an error.
    pub fn record_sweep_failure(&self) {
        self.sweep_runs_total.with_label_values(&["failed"]).inc();
    }

    /// Record a change notification. `action` is `None` when the payload was
    /// rejected before it could be classified.
    pub fn record_notification(&self, action: Option<NotificationAction>, success: bool) {
        let action = action.map(|a| a.as_str()).unwrap_or("unknown");
        let status = if success { "success" } else { "error" };
        self.notifications_total.with_label_values(&[action, status]).inc();
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn render(&self) -> ApiResult<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ApiError::internal_error(format!("Failed to encode metrics: {}", e)))?;
        Ok(buffer)
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.observe_engine(&state.engine.stats());

    match state.metrics.render() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.message.into_bytes(),
            )
        }
    }
}
