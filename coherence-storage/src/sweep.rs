//! Reference-reconciling sweep.
//!
//! Finds cached entities whose record was deleted upstream without a
//! notification reaching us, without enumerating the source of record:
//!
//! 1. Scan the cache. Purge expired slots. Collect, per target entity type,
//!    every id referenced by a live record.
//! 2. Suspect live records of `Referenced` types, and records of `TopLevel`
//!    types older than their `recheck_after`, unless something references
//!    them.
//! 3. Check only suspects upstream, in bounded chunks. Confirmed deletions
//!    are tombstoned; survivors are refreshed.
//!
//! A pass holds the sweep lease for its whole run; a second pass that
//! cannot take the lease returns a skipped report without touching the
//! store or the source of record.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use coherence_core::{
    CacheEntry, CoherenceError, CoherenceResult, EntityId, EntityType, Fields, Reachability, WriteMode, SWEEP_LEASE,
};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::watch;
use uuid::Uuid;

use crate::cache::{scan_ids, CacheStore};
use crate::engine::CacheEngine;
use crate::record_store::RecordStore;

/// Page size for the phase-one cache scan.
const SCAN_PAGE_SIZE: usize = 512;

/// Summary of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Another pass held the lease; nothing was done.
    pub skipped_lease: bool,
    /// Live records examined in phase one.
    pub scanned: u64,
    /// Expired records and tombstones removed in phase one.
    pub expired_purged: u64,
    pub suspected: u64,
    pub existence_checks: u64,
    pub confirmed_deleted: u64,
    pub false_positives: u64,
    pub upstream_calls: u64,
    pub errors: u64,
    /// Shutdown was observed before every suspect was checked.
    pub cancelled: bool,
    pub duration: Duration,
}

impl SweepReport {
    fn skipped() -> Self {
        Self {
            skipped_lease: true,
            ..Self::default()
        }
    }

    /// Short status label for metrics and logs.
    pub fn status(&self) -> &'static str {
        if self.skipped_lease {
            "skipped"
        } else if self.cancelled {
            "cancelled"
        } else if self.errors > 0 {
            "partial"
        } else {
            "completed"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    /// The slot changed since phase one; nothing to do.
    Gone,
    ConfirmedDeleted,
    FalsePositive,
    Error,
}

#[derive(Debug, Clone, Copy)]
struct CheckOutcome {
    verdict: Verdict,
    existence_checked: bool,
    upstream_calls: u64,
}

/// Runs sweep passes against one engine.
pub struct Reconciler<S: ?Sized, R: ?Sized> {
    engine: CacheEngine<S, R>,
    holder: String,
}

impl<S, R> Reconciler<S, R>
where
    S: CacheStore + ?Sized,
    R: RecordStore + ?Sized,
{
    pub fn new(engine: CacheEngine<S, R>) -> Self {
        Self {
            engine,
            holder: format!("sweep-{}", Uuid::now_v7()),
        }
    }

    /// Lease holder id used by this reconciler.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn engine(&self) -> &CacheEngine<S, R> {
        &self.engine
    }

    /// Run one pass. Cancellation is observed between chunks via `shutdown`.
    pub async fn run_pass(&self, shutdown: Option<watch::Receiver<bool>>) -> CoherenceResult<SweepReport> {
        let lease_ttl = self.engine.config().sweep.lease_ttl;
        let store = self.engine.store();

        if !store.try_acquire_lease(SWEEP_LEASE, &self.holder, lease_ttl).await? {
            tracing::info!(holder = %self.holder, "sweep lease held elsewhere, skipping pass");
            return Ok(SweepReport::skipped());
        }

        let started = Instant::now();
        let result = self.sweep(shutdown).await;

        if let Err(e) = store.release_lease(SWEEP_LEASE, &self.holder).await {
            tracing::warn!(holder = %self.holder, error = %e, "failed to release sweep lease");
        }

        let mut report = result?;
        report.duration = started.elapsed();
        tracing::info!(
            status = report.status(),
            scanned = report.scanned,
            expired_purged = report.expired_purged,
            suspected = report.suspected,
            existence_checks = report.existence_checks,
            confirmed_deleted = report.confirmed_deleted,
            false_positives = report.false_positives,
            upstream_calls = report.upstream_calls,
            errors = report.errors,
            duration_ms = report.duration.as_millis() as u64,
            "sweep pass finished"
        );
        Ok(report)
    }

    async fn sweep(&self, shutdown: Option<watch::Receiver<bool>>) -> CoherenceResult<SweepReport> {
        let mut report = SweepReport::default();

        let suspects = self.collect_suspects(&mut report).await?;
        report.suspected = suspects.len() as u64;

        let sweep = &self.engine.config().sweep;
        let chunk_size = sweep.chunk_size.max(1);
        let concurrency = sweep.max_concurrent_checks.max(1);

        for chunk in suspects.chunks(chunk_size) {
            if is_cancelled(shutdown.as_ref()) {
                tracing::info!(remaining = chunk.len(), "sweep cancelled between chunks");
                report.cancelled = true;
                break;
            }

            let outcomes: Vec<CheckOutcome> = stream::iter(chunk.iter().cloned())
                .map(|(entity_type, id)| async move { self.check(&entity_type, &id).await })
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for outcome in outcomes {
                report.upstream_calls += outcome.upstream_calls;
                if outcome.existence_checked {
                    report.existence_checks += 1;
                }
                match outcome.verdict {
                    Verdict::Gone => {}
                    Verdict::ConfirmedDeleted => report.confirmed_deleted += 1,
                    Verdict::FalsePositive => report.false_positives += 1,
                    Verdict::Error => report.errors += 1,
                }
            }
        }

        Ok(report)
    }

    /// Phase one and two: purge expired slots, build referenced-id sets,
    /// and return the ids worth an upstream check.
    async fn collect_suspects(&self, report: &mut SweepReport) -> CoherenceResult<Vec<(EntityType, EntityId)>> {
        let store = self.engine.store();
        let now = self.engine.clock().now();

        let mut referenced: HashMap<EntityType, HashSet<EntityId>> = HashMap::new();
        let mut candidates: Vec<(EntityType, EntityId)> = Vec::new();

        for schema in self.engine.schemas().iter() {
            let entity_type = &schema.entity_type;
            let mut ids = Box::pin(scan_ids(store.as_ref(), entity_type, SCAN_PAGE_SIZE));

            while let Some(id) = ids.try_next().await? {
                let Some(entry) = store.entry(entity_type, &id).await? else {
                    continue;
                };

                if entry.is_expired(now) {
                    if let Some(purged) = store.purge_expired(entity_type, &id).await? {
                        self.engine.indexes().remove_entry(entity_type, &id, &purged)?;
                        report.expired_purged += 1;
                    }
                    continue;
                }

                let CacheEntry::Record(record) = entry else {
                    continue;
                };
                report.scanned += 1;

                for (target, ref_id) in schema.reference_ids(&record.fields) {
                    referenced.entry(target.clone()).or_default().insert(ref_id);
                }

                let candidate = match schema.reachability {
                    Reachability::Referenced => true,
                    Reachability::TopLevel => schema.recheck_after.is_some_and(|age| record.age(now) >= age),
                };
                if candidate {
                    candidates.push((entity_type.clone(), id));
                }
            }
        }

        // A live reference vouches for its target, whatever its reachability.
        let suspects = candidates
            .into_iter()
            .filter(|(t, id)| !referenced.get(t).is_some_and(|ids| ids.contains(id)))
            .collect();
        Ok(suspects)
    }

    /// Existence check for one suspect, followed by eviction or refresh.
    async fn check(&self, entity_type: &EntityType, id: &str) -> CheckOutcome {
        let mut outcome = CheckOutcome {
            verdict: Verdict::Gone,
            existence_checked: false,
            upstream_calls: 0,
        };

        match self.engine.store().get(entity_type, id).await {
            Ok(Some(_)) => {}
            Ok(None) => return outcome,
            Err(e) => {
                tracing::warn!(entity_type = %entity_type, id, error = %e, "sweep could not read slot");
                outcome.verdict = Verdict::Error;
                return outcome;
            }
        }

        let records = self.engine.records();
        outcome.existence_checked = true;
        outcome.upstream_calls += 1;
        let exists = match self.engine.bounded(records.exists(entity_type, id)).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!(entity_type = %entity_type, id, error = %e, "existence check failed");
                outcome.verdict = Verdict::Error;
                return outcome;
            }
        };

        let result = if exists {
            outcome.upstream_calls += 1;
            match self.engine.bounded(records.fetch(entity_type, id)).await {
                Ok(Some(fields)) => self.refresh(entity_type, id, fields).await,
                Ok(None) => self.evict(entity_type, id).await,
                Err(e) => {
                    tracing::warn!(entity_type = %entity_type, id, error = %e, "refresh fetch failed");
                    outcome.verdict = Verdict::Error;
                    return outcome;
                }
            }
        } else {
            self.evict(entity_type, id).await
        };

        outcome.verdict = match result {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(entity_type = %entity_type, id, error = %e, "sweep could not update slot");
                Verdict::Error
            }
        };
        outcome
    }

    async fn evict(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<Verdict> {
        self.engine.evict_with_tombstone(entity_type, id).await?;
        tracing::debug!(entity_type = %entity_type, id, "orphan confirmed and tombstoned");
        Ok(Verdict::ConfirmedDeleted)
    }

    async fn refresh(&self, entity_type: &EntityType, id: &str, fields: Fields) -> CoherenceResult<Verdict> {
        match self
            .engine
            .apply_record(entity_type, id, fields, WriteMode::RespectTombstone)
            .await
        {
            Ok(_) => Ok(Verdict::FalsePositive),
            // A concurrent delete wins over the refresh.
            Err(CoherenceError::Suppressed { .. }) => Ok(Verdict::Gone),
            Err(e) => Err(e),
        }
    }
}

fn is_cancelled(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.is_some_and(|rx| *rx.borrow())
}
