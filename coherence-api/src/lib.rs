//! Coherence API - HTTP Surface for the Cache Consistency Engine
//!
//! Receives signed change notifications from the source of record, exposes
//! health and Prometheus endpoints, runs the scheduled reconciliation sweep
//! and talks to the source of record over REST.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod jobs;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod upstream;

pub use bootstrap::{build_engine, load_schemas};
pub use config::{ApiConfig, CacheBackendConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_router;
pub use routes::ingest::{sign_payload, IngestAck, IngestHandler, SIGNATURE_HEADER};
pub use state::{ApiEngine, ApiReconciler, AppState};
pub use upstream::HttpRecordStore;
