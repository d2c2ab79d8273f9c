//! Scheduled Reconciliation Sweep
//!
//! Runs one [`Reconciler`] pass every `SweepConfig::interval`, independent of
//! request traffic. Passes across processes are serialized by the sweep lease
//! in the cache store; a pass that finds the lease held is reported as
//! skipped. A shutdown signal cancels an in-flight pass between chunks.
//!
//! # Configuration
//!
//! The task reads `SweepConfig` (see `COHERENCE_SWEEP_*` in
//! `EngineConfig::from_env`):
//!
//! ```rust
//! use coherence_core::SweepConfig;
//! use std::time::Duration;
//!
//! let config = SweepConfig {
//!     interval: Duration::from_secs(6 * 3600),
//!     ..SweepConfig::default()
//! };
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use coherence_core::SweepConfig;
use coherence_storage::{CacheStore, RecordStore, Reconciler};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::telemetry::CoherenceMetrics;

// ============================================================================
// METRICS
// ============================================================================

/// Lifetime counters for the sweep task.
#[derive(Debug, Default)]
pub struct ReconcileJobMetrics {
    /// Passes that ran to completion or were cancelled
    pub passes: AtomicU64,

    /// Passes skipped because another holder had the lease
    pub skipped: AtomicU64,

    /// Passes that returned an error
    pub failures: AtomicU64,

    /// Orphans tombstoned since startup
    pub confirmed_deleted: AtomicU64,
}

impl ReconcileJobMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ReconcileJobSnapshot {
        ReconcileJobSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            confirmed_deleted: self.confirmed_deleted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of job metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileJobSnapshot {
    pub passes: u64,
    pub skipped: u64,
    pub failures: u64,
    pub confirmed_deleted: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that runs sweep passes until shutdown.
///
/// The first pass runs one full interval after start. Returns the metrics
/// collected during the task's lifetime.
pub async fn reconcile_task<S, R>(
    reconciler: Arc<Reconciler<S, R>>,
    config: SweepConfig,
    metrics: Arc<CoherenceMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<ReconcileJobMetrics>
where
    S: CacheStore + ?Sized,
    R: RecordStore + ?Sized,
{
    let job_metrics = Arc::new(ReconcileJobMetrics::new());

    if !config.enabled {
        tracing::info!("Reconciliation sweep disabled");
        return job_metrics;
    }

    let mut sweep_interval = interval_at(Instant::now() + config.interval, config.interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        chunk_size = config.chunk_size,
        max_concurrent_checks = config.max_concurrent_checks,
        holder = reconciler.holder(),
        "Reconciliation sweep task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Reconciliation sweep task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                run_pass(&reconciler, &metrics, &job_metrics, &shutdown_rx).await;
            }
        }
    }

    let snapshot = job_metrics.snapshot();
    tracing::info!(
        passes = snapshot.passes,
        skipped = snapshot.skipped,
        failures = snapshot.failures,
        confirmed_deleted = snapshot.confirmed_deleted,
        "Reconciliation sweep task completed"
    );

    job_metrics
}

async fn run_pass<S, R>(
    reconciler: &Reconciler<S, R>,
    metrics: &CoherenceMetrics,
    job_metrics: &ReconcileJobMetrics,
    shutdown_rx: &watch::Receiver<bool>,
) where
    S: CacheStore + ?Sized,
    R: RecordStore + ?Sized,
{
    match reconciler.run_pass(Some(shutdown_rx.clone())).await {
        Ok(report) if report.skipped_lease => {
            job_metrics.skipped.fetch_add(1, Ordering::Relaxed);
            metrics.record_sweep(&report);
        }
        Ok(report) => {
            job_metrics.passes.fetch_add(1, Ordering::Relaxed);
            job_metrics
                .confirmed_deleted
                .fetch_add(report.confirmed_deleted, Ordering::Relaxed);
            metrics.record_sweep(&report);
        }
        Err(e) => {
            tracing::error!(error = %e, "Reconciliation sweep pass failed");
            job_metrics.failures.fetch_add(1, Ordering::Relaxed);
            metrics.record_sweep_failure();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use coherence_core::{EngineConfig, EntitySchema, EntityType, Fields, SchemaRegistry, WriteOrigin};
    use coherence_storage::{CacheEngine, InMemoryCacheStore, MockRecordStore};
    use std::time::Duration;

    type Sweep = Reconciler<InMemoryCacheStore, MockRecordStore>;

    fn reconciler(config: &SweepConfig) -> Arc<Sweep> {
        let schemas = SchemaRegistry::new().with(EntitySchema::new("comment").referenced_only());
        let engine = CacheEngine::new(
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(MockRecordStore::new()),
            schemas,
            EngineConfig::default().with_sweep(config.clone()),
        )
        .expect("engine");
        Arc::new(Reconciler::new(engine))
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = ReconcileJobMetrics::new();
        metrics.passes.store(4, Ordering::Relaxed);
        metrics.confirmed_deleted.store(9, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.passes, 4);
        assert_eq!(snapshot.confirmed_deleted, 9);
        assert_eq!(snapshot.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_task_returns_immediately() {
        let config = SweepConfig {
            enabled: false,
            ..SweepConfig::development()
        };
        let metrics = Arc::new(CoherenceMetrics::new().expect("metrics"));
        let (_tx, rx) = watch::channel(false);

        let job = reconcile_task(reconciler(&config), config, metrics, rx).await;
        assert_eq!(job.snapshot().passes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_sweeps_on_schedule_and_stops() {
        let config = SweepConfig::development();
        let sweep = reconciler(&config);
        let comment = EntityType::from("comment");
        sweep
            .engine()
            .create_or_update(&comment, "c1", Fields::new(), WriteOrigin::Notification)
            .await
            .expect("write");

        let metrics = Arc::new(CoherenceMetrics::new().expect("metrics"));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reconcile_task(sweep.clone(), config.clone(), metrics.clone(), rx));

        tokio::time::sleep(config.interval + Duration::from_secs(1)).await;
        tx.send(true).expect("send");
        let job = handle.await.expect("join");

        let snapshot = job.snapshot();
        assert_eq!(snapshot.passes, 1);
        assert_eq!(snapshot.confirmed_deleted, 1);
        assert!(sweep.engine().store().has_tombstone(&comment, "c1").await.expect("has"));
        assert_eq!(metrics.sweep_runs_total.with_label_values(&["completed"]).get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_spawns_over_trait_objects() {
        let config = SweepConfig::development();
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let records: Arc<dyn RecordStore> = Arc::new(MockRecordStore::new());
        let schemas = SchemaRegistry::new().with(EntitySchema::new("comment").referenced_only());
        let engine = CacheEngine::new(store, records, schemas, EngineConfig::default().with_sweep(config.clone()))
            .expect("engine");
        let sweep = Arc::new(crate::ApiReconciler::new(engine));

        let metrics = Arc::new(CoherenceMetrics::new().expect("metrics"));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reconcile_task(sweep, config.clone(), metrics, rx));

        tokio::time::sleep(config.interval + Duration::from_secs(1)).await;
        tx.send(true).expect("send");
        let job = handle.await.expect("join");
        assert_eq!(job.snapshot().passes, 1);
        assert_eq!(job.snapshot().failures, 0);
    }
}
