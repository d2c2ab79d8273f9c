//! Shared application state for Axum routers.

use std::sync::Arc;

use coherence_storage::{CacheEngine, CacheStore, RecordStore, Reconciler};

use crate::routes::ingest::IngestHandler;
use crate::telemetry::CoherenceMetrics;

/// Engine type used by the server: the cache backend and the source of
/// record are chosen at startup, so both sit behind trait objects.
pub type ApiEngine = CacheEngine<dyn CacheStore, dyn RecordStore>;

/// Sweep runner over [`ApiEngine`].
pub type ApiReconciler = Reconciler<dyn CacheStore, dyn RecordStore>;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub engine: ApiEngine,
    pub ingest: Arc<IngestHandler>,
    /// Held here, not in a global registry.
    pub metrics: Arc<CoherenceMetrics>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(engine: ApiEngine, ingest: IngestHandler, metrics: Arc<CoherenceMetrics>) -> Self {
        Self {
            engine,
            ingest: Arc::new(ingest),
            metrics,
            start_time: std::time::Instant::now(),
        }
    }
}

/// `FromRef<AppState>` for a field, so handlers can extract it directly.
macro_rules! state_field {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<AppState> for $type {
            fn from_ref(state: &AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}

state_field!(ApiEngine, engine);
state_field!(Arc<IngestHandler>, ingest);
state_field!(Arc<CoherenceMetrics>, metrics);
state_field!(std::time::Instant, start_time);
