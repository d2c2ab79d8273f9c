//! Cache store trait and scan helpers.
//!
//! A cache store holds one slot per (entity type, id). A slot contains
//! either a live or expired [`CachedRecord`] or a [`Tombstone`]. Every
//! operation touches a single slot atomically; there are no multi-key
//! transactions.

use async_trait::async_trait;
use coherence_core::{
    CacheEntry, CachedRecord, CoherenceError, CoherenceResult, EntityId, EntityType, Fields, WriteMode,
};
use futures_util::stream::{self, Stream, TryStreamExt};
use std::time::Duration;

/// Cache store trait for pluggable backends.
///
/// Implementations are thread-safe and read the current time from their
/// own [`coherence_core::Clock`] when deciding expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Raw slot contents, including expired records and tombstones.
    async fn entry(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<Option<CacheEntry>>;

    /// Live record, or `None` on a miss. Counts towards hit/miss stats.
    async fn get(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<Option<CachedRecord>>;

    /// Write a record that lives for `ttl`.
    ///
    /// With [`WriteMode::RespectTombstone`] the write fails with
    /// [`CoherenceError::Suppressed`] while a live tombstone occupies the
    /// slot. [`WriteMode::ClearTombstone`] replaces the tombstone in the
    /// same step.
    async fn set(
        &self,
        entity_type: &EntityType,
        id: &str,
        fields: Fields,
        ttl: Duration,
        mode: WriteMode,
    ) -> CoherenceResult<CachedRecord>;

    /// Remove a record from its slot. Tombstones are left in place.
    /// Returns the removed record, if any.
    async fn delete(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<Option<CachedRecord>>;

    /// Replace the slot with a tombstone that lives for `ttl`.
    /// Returns the record it replaced, if any.
    async fn tombstone(
        &self,
        entity_type: &EntityType,
        id: &str,
        ttl: Duration,
    ) -> CoherenceResult<Option<CachedRecord>>;

    /// Whether a live tombstone occupies the slot.
    async fn has_tombstone(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<bool>;

    /// Remove a tombstone (live or expired). Returns whether one was removed.
    async fn clear_tombstone(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<bool>;

    /// Empty the slot if, and only if, its contents have expired.
    /// Returns the removed entry.
    async fn purge_expired(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<Option<CacheEntry>>;

    /// Up to `limit` ids of occupied slots of `entity_type`, in id order,
    /// strictly after `after`.
    async fn scan_page(
        &self,
        entity_type: &EntityType,
        after: Option<&str>,
        limit: usize,
    ) -> CoherenceResult<Vec<EntityId>>;

    /// Take the named lease if it is free, expired, or already held by
    /// `holder`. Returns whether the lease is now held by `holder`.
    async fn try_acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> CoherenceResult<bool>;

    /// Release the named lease if `holder` owns it.
    async fn release_lease(&self, name: &str, holder: &str) -> CoherenceResult<bool>;

    /// Get cache statistics.
    async fn stats(&self) -> CoherenceResult<CacheStats>;
}

/// Lazily walk every occupied slot id of `entity_type`.
///
/// The stream pages through [`CacheStore::scan_page`], so it stays valid
/// under concurrent writes and can be restarted from any id.
pub fn scan_ids<'a, S>(
    store: &'a S,
    entity_type: &'a EntityType,
    page_size: usize,
) -> impl Stream<Item = CoherenceResult<EntityId>> + 'a
where
    S: CacheStore + ?Sized,
{
    let page_size = page_size.max(1);
    // `None` once the last page has been read; otherwise the cursor.
    let start: Option<Option<EntityId>> = Some(None);

    stream::try_unfold(start, move |cursor| async move {
        let Some(after) = cursor else {
            return Ok::<_, CoherenceError>(None);
        };
        let page = store.scan_page(entity_type, after.as_deref(), page_size).await?;
        if page.is_empty() {
            return Ok(None);
        }
        let next = if page.len() < page_size {
            None
        } else {
            page.last().cloned().map(Some)
        };
        Ok(Some((page, next)))
    })
    .map_ok(|page| stream::iter(page.into_iter().map(Ok::<EntityId, CoherenceError>)))
    .try_flatten()
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Slots holding a record (live or expired).
    pub records: u64,
    /// Slots holding a tombstone (live or expired).
    pub tombstones: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Number of occupied slots.
    pub fn entry_count(&self) -> u64 {
        self.records + self.tombstones
    }
}
