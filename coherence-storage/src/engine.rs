//! Cache-aside operations.
//!
//! [`CacheEngine`] is the only sanctioned way to mutate cached entities. It
//! implements read-through on `get_by_id`/`get_by_field`, write-invalidate
//! on `create_or_update`/`delete`, and tombstone suppression so a deleted
//! entity cannot be resurrected by a stale read-through.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use coherence_core::{
    CachedRecord, ChangeNotification, Clock, CoherenceError, CoherenceResult, EngineConfig, EntityType, Fields,
    SchemaRegistry, SystemClock, UpstreamError, WriteMode, WriteOrigin,
};

use crate::cache::{field_matches, CacheRead, CacheStore, IndexManager, ReadSource};
use crate::record_store::RecordStore;

/// Per-engine outcome counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    hit: AtomicU64,
    miss: AtomicU64,
    upstream_error: AtomicU64,
    suppressed_by_tombstone: AtomicU64,
    not_found: AtomicU64,
    populated: AtomicU64,
    deleted: AtomicU64,
    notifications_applied: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub hit: u64,
    pub miss: u64,
    pub upstream_error: u64,
    pub suppressed_by_tombstone: u64,
    pub not_found: u64,
    pub populated: u64,
    pub deleted: u64,
    pub notifications_applied: u64,
}

impl EngineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            upstream_error: self.upstream_error.load(Ordering::Relaxed),
            suppressed_by_tombstone: self.suppressed_by_tombstone.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            populated: self.populated.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            notifications_applied: self.notifications_applied.load(Ordering::Relaxed),
        }
    }
}

impl EngineStatsSnapshot {
    /// Counters as (outcome label, value) pairs.
    pub fn outcomes(&self) -> [(&'static str, u64); 8] {
        [
            ("hit", self.hit),
            ("miss", self.miss),
            ("upstream_error", self.upstream_error),
            ("suppressed_by_tombstone", self.suppressed_by_tombstone),
            ("not_found", self.not_found),
            ("populated", self.populated),
            ("deleted", self.deleted),
            ("notifications_applied", self.notifications_applied),
        ]
    }
}

/// What a change notification did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    Upserted,
    Deleted,
}

impl NotificationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationAction::Upserted => "upserted",
            NotificationAction::Deleted => "deleted",
        }
    }
}

/// Cache consistency engine.
///
/// Holds shared handles to the cache store, the source of record, the index
/// manager, the schema registry and the configuration. Cloning is cheap.
pub struct CacheEngine<S: ?Sized, R: ?Sized> {
    store: Arc<S>,
    records: Arc<R>,
    indexes: Arc<IndexManager>,
    schemas: Arc<SchemaRegistry>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
    stats: Arc<EngineStats>,
}

impl<S: ?Sized, R: ?Sized> Clone for CacheEngine<S, R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            records: Arc::clone(&self.records),
            indexes: Arc::clone(&self.indexes),
            schemas: Arc::clone(&self.schemas),
            config: Arc::clone(&self.config),
            clock: Arc::clone(&self.clock),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<S, R> CacheEngine<S, R>
where
    S: CacheStore + ?Sized,
    R: RecordStore + ?Sized,
{
    /// Create an engine using the wall clock.
    ///
    /// Validates `config` and `schemas` and registers every declared index.
    /// Call [`rebuild_indexes`](Self::rebuild_indexes) once at startup when
    /// the store may already hold records.
    pub fn new(store: Arc<S>, records: Arc<R>, schemas: SchemaRegistry, config: EngineConfig) -> CoherenceResult<Self> {
        Self::with_clock(store, records, schemas, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<S>,
        records: Arc<R>,
        schemas: SchemaRegistry,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> CoherenceResult<Self> {
        config.validate()?;
        schemas.validate()?;
        for advisory in config.advisories() {
            tracing::warn!(advisory = %advisory, "engine configuration advisory");
        }

        let indexes = IndexManager::from_schemas(&schemas)?;
        Ok(Self {
            store,
            records,
            indexes: Arc::new(indexes),
            schemas: Arc::new(schemas),
            config: Arc::new(config),
            clock,
            stats: Arc::new(EngineStats::default()),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn records(&self) -> &Arc<R> {
        &self.records
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Repopulate every secondary index from the cache store.
    pub async fn rebuild_indexes(&self) -> CoherenceResult<usize> {
        self.indexes.rebuild(self.store.as_ref(), &self.schemas).await
    }

    /// Run an upstream call under the configured timeout.
    pub(crate) async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, UpstreamError>>,
    ) -> Result<T, UpstreamError> {
        match tokio::time::timeout(self.config.upstream_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout),
        }
    }

    fn upstream_failed(&self, entity_type: &EntityType, id: &str, err: UpstreamError) -> CoherenceError {
        EngineStats::bump(&self.stats.upstream_error);
        tracing::warn!(entity_type = %entity_type, id, error = %err, "record store call failed");
        CoherenceError::upstream(entity_type, id, err)
    }

    /// Write `fields` into the slot and move the id's index entries from the
    /// previous record's values to the new ones.
    pub(crate) async fn apply_record(
        &self,
        entity_type: &EntityType,
        id: &str,
        fields: Fields,
        mode: WriteMode,
    ) -> CoherenceResult<CachedRecord> {
        let previous = self
            .store
            .entry(entity_type, id)
            .await?
            .and_then(|e| e.as_record().map(|r| r.fields.clone()));

        let record = self
            .store
            .set(entity_type, id, fields, self.config.record_ttl, mode)
            .await?;

        if let Some(old) = previous {
            self.indexes.remove_record(entity_type, id, &old)?;
        }
        self.indexes.add_record(entity_type, id, &record.fields)?;
        Ok(record)
    }

    /// Replace the slot with a tombstone and drop the index entries of the
    /// record it held. Returns whether a record was evicted.
    pub(crate) async fn evict_with_tombstone(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<bool> {
        let replaced = self
            .store
            .tombstone(entity_type, id, self.config.tombstone_ttl)
            .await?;
        match replaced {
            Some(record) => {
                self.indexes.remove_record(entity_type, id, &record.fields)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Read one entity, falling back to the source of record on a miss.
    ///
    /// - live tombstone: `NotFound` with no upstream call
    /// - cache hit: the cached record
    /// - miss: fetch upstream; a missing record leaves a tombstone behind,
    ///   an upstream failure caches nothing and returns `UpstreamUnavailable`
    pub async fn get_by_id(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<CacheRead<CachedRecord>> {
        self.schemas.require(entity_type)?;

        if self.store.has_tombstone(entity_type, id).await? {
            EngineStats::bump(&self.stats.suppressed_by_tombstone);
            tracing::trace!(entity_type = %entity_type, id, "read suppressed by tombstone");
            return Err(CoherenceError::not_found(entity_type, id));
        }

        if let Some(record) = self.store.get(entity_type, id).await? {
            EngineStats::bump(&self.stats.hit);
            tracing::trace!(entity_type = %entity_type, id, "cache hit");
            return Ok(CacheRead::from_record(record, ReadSource::Cache));
        }

        EngineStats::bump(&self.stats.miss);
        tracing::debug!(entity_type = %entity_type, id, "cache miss, fetching upstream");

        let fetched = self
            .bounded(self.records.fetch(entity_type, id))
            .await
            .map_err(|e| self.upstream_failed(entity_type, id, e))?;

        match fetched {
            Some(fields) => self.populate(entity_type, id, fields).await,
            None => {
                EngineStats::bump(&self.stats.not_found);
                self.evict_with_tombstone(entity_type, id).await?;
                tracing::debug!(entity_type = %entity_type, id, "absent upstream, tombstoned");
                Err(CoherenceError::not_found(entity_type, id))
            }
        }
    }

    /// Cache a record fetched on a miss. A tombstone written since the fetch
    /// started wins and the read reports `NotFound`.
    async fn populate(&self, entity_type: &EntityType, id: &str, fields: Fields) -> CoherenceResult<CacheRead<CachedRecord>> {
        match self.apply_record(entity_type, id, fields, WriteMode::RespectTombstone).await {
            Ok(record) => {
                EngineStats::bump(&self.stats.populated);
                Ok(CacheRead::from_record(record, ReadSource::Upstream))
            }
            Err(CoherenceError::Suppressed { .. }) => {
                EngineStats::bump(&self.stats.suppressed_by_tombstone);
                tracing::debug!(entity_type = %entity_type, id, "populate lost to concurrent delete");
                Err(CoherenceError::not_found(entity_type, id))
            }
            Err(e) => Err(e),
        }
    }

    /// Read every entity whose `field` carries `value`.
    ///
    /// Index candidates are verified against the cache; candidates whose
    /// record expired are pruned and re-resolved through `get_by_id`. When
    /// nothing resolves and the schema allows it, the source of record is
    /// queried and its answers are cached (tombstoned ids are left out).
    pub async fn get_by_field(
        &self,
        entity_type: &EntityType,
        field: &str,
        value: &str,
    ) -> CoherenceResult<Vec<CacheRead<CachedRecord>>> {
        let schema = self.schemas.require(entity_type)?;
        let mut results = Vec::new();

        if self.indexes.is_registered(entity_type, field) {
            let candidates = self.indexes.index_lookup(entity_type, field, value)?;
            for id in candidates {
                match self.store.get(entity_type, &id).await? {
                    Some(record) if field_matches(&record.fields, field, value) => {
                        EngineStats::bump(&self.stats.hit);
                        results.push(CacheRead::from_record(record, ReadSource::Cache));
                    }
                    Some(_) => {
                        self.indexes.index_remove(entity_type, field, value, &id)?;
                    }
                    None => {
                        self.indexes.index_remove(entity_type, field, value, &id)?;
                        match self.get_by_id(entity_type, &id).await {
                            Ok(read) if field_matches(&read.value().fields, field, value) => results.push(read),
                            Ok(_) | Err(CoherenceError::NotFound { .. }) => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
        }

        if !results.is_empty() || !schema.field_fallback {
            return Ok(results);
        }

        tracing::debug!(entity_type = %entity_type, field, value, "field lookup falling back upstream");
        let fetched = self
            .bounded(self.records.fetch_by_field(entity_type, field, value))
            .await
            .map_err(|e| self.upstream_failed(entity_type, &format!("{field}={value}"), e))?;

        for (id, fields) in fetched {
            match self.populate(entity_type, &id, fields).await {
                Ok(read) => results.push(read),
                Err(CoherenceError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    /// Write an entity.
    ///
    /// Application writes reach the source of record first unless the caller
    /// already wrote it; notification writes never call upstream. The cache
    /// is written only once the source of record holds the data, clearing
    /// any tombstone in the same step.
    pub async fn create_or_update(
        &self,
        entity_type: &EntityType,
        id: &str,
        fields: Fields,
        origin: WriteOrigin,
    ) -> CoherenceResult<CachedRecord> {
        self.schemas.require(entity_type)?;

        let confirmed = if origin.needs_upstream_write() {
            self.bounded(self.records.upsert(entity_type, id, fields))
                .await
                .map_err(|e| self.upstream_failed(entity_type, id, e))?
        } else {
            fields
        };

        let record = self
            .apply_record(entity_type, id, confirmed, WriteMode::ClearTombstone)
            .await?;

        match origin {
            WriteOrigin::Notification => EngineStats::bump(&self.stats.notifications_applied),
            WriteOrigin::Application { .. } => EngineStats::bump(&self.stats.populated),
        }
        tracing::debug!(entity_type = %entity_type, id, ?origin, "record written");
        Ok(record)
    }

    /// Delete an entity from the source of record, then tombstone it.
    ///
    /// An upstream failure leaves the cache untouched.
    pub async fn delete(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<()> {
        self.schemas.require(entity_type)?;

        self.bounded(self.records.delete(entity_type, id))
            .await
            .map_err(|e| self.upstream_failed(entity_type, id, e))?;

        self.evict_with_tombstone(entity_type, id).await?;
        EngineStats::bump(&self.stats.deleted);
        tracing::debug!(entity_type = %entity_type, id, "record deleted and tombstoned");
        Ok(())
    }

    /// Apply a change notification from the source of record.
    ///
    /// Replays are idempotent and delivery order is not checked: the last
    /// notification applied wins until the record TTL runs out.
    pub async fn apply_notification(&self, notification: &ChangeNotification) -> CoherenceResult<NotificationAction> {
        let entity_type = &notification.entity_type;
        let id = notification.record_id.as_str();

        if notification.deleted {
            self.schemas.require(entity_type)?;
            self.evict_with_tombstone(entity_type, id).await?;
            EngineStats::bump(&self.stats.notifications_applied);
            tracing::debug!(entity_type = %entity_type, id, "deletion notification applied");
            return Ok(NotificationAction::Deleted);
        }

        self.create_or_update(entity_type, id, notification.fields.clone(), WriteOrigin::Notification)
            .await?;
        Ok(NotificationAction::Upserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use crate::mock::MockRecordStore;
    use coherence_core::{EntitySchema, ManualClock};
    use serde_json::json;
    use std::time::Duration;

    type Engine = CacheEngine<InMemoryCacheStore, MockRecordStore>;

    struct Harness {
        engine: Engine,
        records: Arc<MockRecordStore>,
        clock: Arc<ManualClock>,
    }

    fn fields(v: serde_json::Value) -> Fields {
        v.as_object().cloned().unwrap_or_default()
    }

    fn post() -> EntityType {
        EntityType::from("post")
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryCacheStore::with_clock(clock.clone()));
        let records = Arc::new(MockRecordStore::new());
        let schemas = SchemaRegistry::new()
            .with(EntitySchema::new("author").indexed("email"))
            .with(EntitySchema::new("post").indexed("slug").reference("author_id", "author"));
        let config = EngineConfig::default()
            .with_tombstone_ttl(Duration::from_secs(600))
            .with_upstream_timeout(Duration::from_millis(200));
        let engine = CacheEngine::with_clock(store, records.clone(), schemas, config, clock.clone())
            .expect("engine");
        Harness { engine, records, clock }
    }

    #[tokio::test]
    async fn test_read_through_populates_then_hits() {
        let h = harness();
        h.records.insert("post", "p1", fields(json!({"slug": "hello"})));

        let first = h.engine.get_by_id(&post(), "p1").await.expect("read");
        assert_eq!(first.source(), ReadSource::Upstream);
        let second = h.engine.get_by_id(&post(), "p1").await.expect("read");
        assert_eq!(second.source(), ReadSource::Cache);
        assert_eq!(second.value().fields["slug"], "hello");
        assert_eq!(h.records.calls().fetch, 1);

        let stats = h.engine.stats();
        assert_eq!((stats.hit, stats.miss, stats.populated), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_delete_then_read_makes_no_upstream_call_until_tombstone_expires() {
        let h = harness();
        h.records.insert("post", "p1", fields(json!({"slug": "hello"})));
        h.engine.get_by_id(&post(), "p1").await.expect("warm");

        h.engine.delete(&post(), "p1").await.expect("delete");
        h.records.reset_calls();

        h.clock.advance(Duration::from_secs(1));
        let err = h.engine.get_by_id(&post(), "p1").await.unwrap_err();
        assert!(matches!(err, CoherenceError::NotFound { .. }));
        assert_eq!(h.records.calls().total(), 0);

        h.clock.advance(Duration::from_secs(600));
        let err = h.engine.get_by_id(&post(), "p1").await.unwrap_err();
        assert!(matches!(err, CoherenceError::NotFound { .. }));
        assert_eq!(h.records.calls().fetch, 1);
    }

    #[tokio::test]
    async fn test_delete_prunes_indexes() {
        let h = harness();
        h.records.insert("post", "p1", fields(json!({"slug": "hello"})));
        h.engine.get_by_id(&post(), "p1").await.expect("warm");
        assert!(!h.engine.indexes().index_lookup(&post(), "slug", "hello").expect("lookup").is_empty());

        h.engine.delete(&post(), "p1").await.expect("delete");
        assert!(h.engine.indexes().index_lookup(&post(), "slug", "hello").expect("lookup").is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_caches_nothing() {
        let h = harness();
        h.records.insert("post", "p1", Fields::new());
        h.records.set_unavailable(true);

        let err = h.engine.get_by_id(&post(), "p1").await.unwrap_err();
        assert!(matches!(err, CoherenceError::UpstreamUnavailable { .. }));
        assert!(err.is_retryable());
        assert!(h.engine.store().entry(&post(), "p1").await.expect("entry").is_none());
        assert_eq!(h.engine.stats().upstream_error, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_timeout_is_unavailable() {
        let h = harness();
        h.records.insert("post", "p1", Fields::new());
        h.records.set_delay(Duration::from_secs(5));

        let err = h.engine.get_by_id(&post(), "p1").await.unwrap_err();
        match err {
            CoherenceError::UpstreamUnavailable { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(h.engine.store().entry(&post(), "p1").await.expect("entry").is_none());
    }

    #[tokio::test]
    async fn test_upstream_not_found_tombstones() {
        let h = harness();
        let err = h.engine.get_by_id(&post(), "ghost").await.unwrap_err();
        assert!(matches!(err, CoherenceError::NotFound { .. }));
        assert!(h.engine.store().has_tombstone(&post(), "ghost").await.expect("has"));

        h.engine.get_by_id(&post(), "ghost").await.unwrap_err();
        assert_eq!(h.records.calls().fetch, 1);
    }

    #[tokio::test]
    async fn test_notification_clears_tombstone() {
        let h = harness();
        h.engine.delete(&post(), "p1").await.expect("delete");

        let n = ChangeNotification::upsert("post", "p1", fields(json!({"slug": "back"})));
        let action = h.engine.apply_notification(&n).await.expect("apply");
        assert_eq!(action, NotificationAction::Upserted);

        let read = h.engine.get_by_id(&post(), "p1").await.expect("read");
        assert_eq!(read.value().fields["slug"], "back");
        assert_eq!(h.records.calls().fetch, 0);
    }

    #[tokio::test]
    async fn test_deletion_notification_tombstones_without_upstream_call() {
        let h = harness();
        h.engine
            .create_or_update(&post(), "p1", fields(json!({"slug": "x"})), WriteOrigin::Notification)
            .await
            .expect("write");

        let action = h
            .engine
            .apply_notification(&ChangeNotification::deletion("post", "p1"))
            .await
            .expect("apply");
        assert_eq!(action, NotificationAction::Deleted);
        assert!(h.engine.store().has_tombstone(&post(), "p1").await.expect("has"));
        assert!(h.engine.indexes().index_lookup(&post(), "slug", "x").expect("lookup").is_empty());
        assert_eq!(h.records.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_application_write_goes_upstream_first() {
        let h = harness();
        let f = fields(json!({"slug": "new"}));
        h.engine
            .create_or_update(&post(), "p1", f.clone(), WriteOrigin::Application { upstream_written: false })
            .await
            .expect("write");
        assert_eq!(h.records.get("post", "p1"), Some(f.clone()));
        assert_eq!(h.records.calls().upsert, 1);

        h.engine
            .create_or_update(&post(), "p2", f, WriteOrigin::Application { upstream_written: true })
            .await
            .expect("write");
        assert_eq!(h.records.calls().upsert, 1);
    }

    #[tokio::test]
    async fn test_failed_application_write_leaves_cache_alone() {
        let h = harness();
        h.records.set_unavailable(true);
        let err = h
            .engine
            .create_or_update(&post(), "p1", Fields::new(), WriteOrigin::Application { upstream_written: false })
            .await
            .unwrap_err();
        assert!(matches!(err, CoherenceError::UpstreamUnavailable { .. }));
        assert!(h.engine.store().entry(&post(), "p1").await.expect("entry").is_none());
    }

    #[tokio::test]
    async fn test_reindex_on_value_change() {
        let h = harness();
        h.engine
            .create_or_update(&post(), "p1", fields(json!({"slug": "old"})), WriteOrigin::Notification)
            .await
            .expect("write");
        h.engine
            .create_or_update(&post(), "p1", fields(json!({"slug": "new"})), WriteOrigin::Notification)
            .await
            .expect("write");

        let idx = h.engine.indexes();
        assert!(idx.index_lookup(&post(), "slug", "old").expect("lookup").is_empty());
        assert!(idx.index_lookup(&post(), "slug", "new").expect("lookup").contains("p1"));
    }

    #[tokio::test]
    async fn test_get_by_field_prunes_stale_and_rereads() {
        let h = harness();
        h.records.insert("post", "p1", fields(json!({"slug": "s"})));
        h.engine.get_by_id(&post(), "p1").await.expect("warm");

        // Record expires in the cache; upstream has changed its slug.
        h.clock.advance(h.engine.config().record_ttl);
        h.records.insert("post", "p1", fields(json!({"slug": "t"})));
        h.records.reset_calls();

        let found = h.engine.get_by_field(&post(), "slug", "s").await.expect("lookup");
        assert!(found.is_empty());
        assert!(h.engine.indexes().index_lookup(&post(), "slug", "s").expect("lookup").is_empty());
        assert!(h.engine.indexes().index_lookup(&post(), "slug", "t").expect("lookup").contains("p1"));
        // One re-resolve fetch plus one fallback query for the now-empty result.
        assert_eq!(h.records.calls().fetch, 1);
        assert_eq!(h.records.calls().fetch_by_field, 1);
    }

    #[tokio::test]
    async fn test_get_by_field_falls_back_and_skips_tombstoned() {
        let h = harness();
        h.records.insert("post", "p1", fields(json!({"slug": "same"})));
        h.records.insert("post", "p2", fields(json!({"slug": "same"})));
        h.engine.store().tombstone(&post(), "p2", Duration::from_secs(60)).await.expect("tombstone");

        let found = h.engine.get_by_field(&post(), "slug", "same").await.expect("lookup");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value().id, "p1");
        assert_eq!(found[0].source(), ReadSource::Upstream);

        let again = h.engine.get_by_field(&post(), "slug", "same").await.expect("lookup");
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].source(), ReadSource::Cache);
        assert_eq!(h.records.calls().fetch_by_field, 1);
    }

    #[tokio::test]
    async fn test_unknown_entity_type_is_config_error() {
        let h = harness();
        let err = h.engine.get_by_id(&EntityType::from("ghost"), "x").await.unwrap_err();
        assert!(matches!(err, CoherenceError::Config(_)));
        assert_eq!(h.records.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_rebuild_indexes_restores_lookups() {
        let h = harness();
        h.engine
            .create_or_update(&post(), "p1", fields(json!({"slug": "a"})), WriteOrigin::Notification)
            .await
            .expect("write");

        let fresh = CacheEngine::with_clock(
            h.engine.store().clone(),
            h.records.clone(),
            h.engine.schemas().clone(),
            h.engine.config().clone(),
            h.clock.clone(),
        )
        .expect("engine");
        assert!(fresh.indexes().index_lookup(&post(), "slug", "a").expect("lookup").is_empty());
        assert_eq!(fresh.rebuild_indexes().await.expect("rebuild"), 1);
        assert!(fresh.indexes().index_lookup(&post(), "slug", "a").expect("lookup").contains("p1"));
    }
}
