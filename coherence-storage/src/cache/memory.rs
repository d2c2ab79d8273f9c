//! In-memory cache store for tests and single-process deployments.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coherence_core::{
    CacheEntry, CachedRecord, Clock, CoherenceError, CoherenceResult, EntityId, EntityType, Fields,
    LeaseData, SystemClock, Tombstone, WriteMode,
};
use tokio::sync::{Mutex, RwLock};

use super::traits::{CacheStats, CacheStore};

type Slots = BTreeMap<EntityType, BTreeMap<EntityId, CacheEntry>>;

/// Cache store backed by ordered in-process maps.
pub struct InMemoryCacheStore {
    slots: RwLock<Slots>,
    leases: Mutex<HashMap<String, LeaseData>>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: RwLock::new(BTreeMap::new()),
            leases: Mutex::new(HashMap::new()),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Total number of occupied slots across all entity types.
    pub async fn len(&self) -> usize {
        self.slots.read().await.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn entry(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<Option<CacheEntry>> {
        let slots = self.slots.read().await;
        Ok(slots.get(entity_type).and_then(|m| m.get(id)).cloned())
    }

    async fn get(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<Option<CachedRecord>> {
        let now = self.clock.now();
        let slots = self.slots.read().await;
        let record = slots
            .get(entity_type)
            .and_then(|m| m.get(id))
            .and_then(|e| e.live_record(now))
            .cloned();

        if record.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(record)
    }

    async fn set(
        &self,
        entity_type: &EntityType,
        id: &str,
        fields: Fields,
        ttl: Duration,
        mode: WriteMode,
    ) -> CoherenceResult<CachedRecord> {
        let now = self.clock.now();
        let mut slots = self.slots.write().await;
        let by_id = slots.entry(entity_type.clone()).or_default();

        if mode == WriteMode::RespectTombstone && by_id.get(id).is_some_and(|e| e.is_live_tombstone(now)) {
            return Err(CoherenceError::Suppressed {
                entity_type: entity_type.clone(),
                id: id.to_string(),
            });
        }

        let record = CachedRecord::new(entity_type.clone(), id, fields, now, ttl);
        by_id.insert(id.to_string(), CacheEntry::Record(record.clone()));
        Ok(record)
    }

    async fn delete(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<Option<CachedRecord>> {
        let mut slots = self.slots.write().await;
        let Some(by_id) = slots.get_mut(entity_type) else {
            return Ok(None);
        };
        if !matches!(by_id.get(id), Some(CacheEntry::Record(_))) {
            return Ok(None);
        }
        Ok(match by_id.remove(id) {
            Some(CacheEntry::Record(record)) => Some(record),
            _ => None,
        })
    }

    async fn tombstone(
        &self,
        entity_type: &EntityType,
        id: &str,
        ttl: Duration,
    ) -> CoherenceResult<Option<CachedRecord>> {
        let now = self.clock.now();
        let tombstone = Tombstone::new(entity_type.clone(), id, now, ttl);
        let mut slots = self.slots.write().await;
        let previous = slots
            .entry(entity_type.clone())
            .or_default()
            .insert(id.to_string(), CacheEntry::Tombstone(tombstone));
        Ok(match previous {
            Some(CacheEntry::Record(record)) => Some(record),
            _ => None,
        })
    }

    async fn has_tombstone(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<bool> {
        let now = self.clock.now();
        let slots = self.slots.read().await;
        Ok(slots
            .get(entity_type)
            .and_then(|m| m.get(id))
            .is_some_and(|e| e.is_live_tombstone(now)))
    }

    async fn clear_tombstone(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<bool> {
        let mut slots = self.slots.write().await;
        let Some(by_id) = slots.get_mut(entity_type) else {
            return Ok(false);
        };
        if matches!(by_id.get(id), Some(CacheEntry::Tombstone(_))) {
            by_id.remove(id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn purge_expired(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<Option<CacheEntry>> {
        let now = self.clock.now();
        let mut slots = self.slots.write().await;
        let Some(by_id) = slots.get_mut(entity_type) else {
            return Ok(None);
        };
        if by_id.get(id).is_some_and(|e| e.is_expired(now)) {
            return Ok(by_id.remove(id));
        }
        Ok(None)
    }

    async fn scan_page(
        &self,
        entity_type: &EntityType,
        after: Option<&str>,
        limit: usize,
    ) -> CoherenceResult<Vec<EntityId>> {
        let slots = self.slots.read().await;
        let Some(by_id) = slots.get(entity_type) else {
            return Ok(Vec::new());
        };
        let lower = match after {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        Ok(by_id
            .range::<str, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn try_acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> CoherenceResult<bool> {
        let now = self.clock.now();
        let mut leases = self.leases.lock().await;
        if let Some(existing) = leases.get(name) {
            if !existing.is_available_to(holder, now) {
                return Ok(false);
            }
        }
        leases.insert(name.to_string(), LeaseData::new(name, holder, now, ttl));
        Ok(true)
    }

    async fn release_lease(&self, name: &str, holder: &str) -> CoherenceResult<bool> {
        let mut leases = self.leases.lock().await;
        if leases.get(name).is_some_and(|l| l.holder == holder) {
            leases.remove(name);
            return Ok(true);
        }
        Ok(false)
    }

    async fn stats(&self) -> CoherenceResult<CacheStats> {
        let slots = self.slots.read().await;
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ..CacheStats::default()
        };
        for entry in slots.values().flat_map(BTreeMap::values) {
            match entry {
                CacheEntry::Record(_) => stats.records += 1,
                CacheEntry::Tombstone(_) => stats.tombstones += 1,
            }
        }
        Ok(stats)
    }
}
