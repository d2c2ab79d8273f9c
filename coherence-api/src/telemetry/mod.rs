//! Coherence Telemetry - Observability Infrastructure
//!
//! Structured logging via `tracing` and Prometheus metrics for the API layer.

pub mod metrics;
pub mod tracer;

pub use metrics::{metrics_handler, CoherenceMetrics};
pub use tracer::{init_tracing, LogFormat, TelemetryConfig};
