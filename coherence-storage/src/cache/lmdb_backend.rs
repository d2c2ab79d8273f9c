//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a persistent,
//! memory-mapped key-value store for cached records, tombstones and leases.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions with a single writer. The store uses:
//! - Read transactions for `entry`, `get`, `has_tombstone`, `scan_page` and `stats`
//! - One write transaction per mutating call, so every read-check-write on a
//!   slot (tombstone check in `set`, lease acquisition) is atomic
//! - Hit/miss statistics are tracked with atomic counters

use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coherence_core::{
    CacheEntry, CachedRecord, Clock, CoherenceError, CoherenceResult, EntityId, EntityType, Fields,
    LeaseData, StorageError, SystemClock, Tombstone, WriteMode,
};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::key::{lease_key, EntryKey};
use super::traits::{CacheStats, CacheStore};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for StorageError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Serialization(_) | LmdbCacheError::Deserialization(_) => {
                StorageError::Serialization { reason: e.to_string() }
            }
            other => StorageError::TransactionFailed {
                reason: other.to_string(),
            },
        }
    }
}

impl From<LmdbCacheError> for CoherenceError {
    fn from(e: LmdbCacheError) -> Self {
        CoherenceError::Storage(e.into())
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, LmdbCacheError> {
    serde_json::from_slice(bytes).map_err(|e| LmdbCacheError::Deserialization(e.to_string()))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, LmdbCacheError> {
    serde_json::to_vec(value).map_err(|e| LmdbCacheError::Serialization(e.to_string()))
}

/// LMDB-backed cache store.
///
/// # Example
///
/// ```ignore
/// use coherence_storage::cache::LmdbCacheStore;
///
/// let store = LmdbCacheStore::new("/var/lib/coherence/cache", 1024)?;
/// store.set(&"post".into(), "p1", fields, ttl, WriteMode::RespectTombstone).await?;
/// ```
pub struct LmdbCacheStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LmdbCacheStore {
    /// Open (or create) an LMDB cache store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        Self::with_clock(path, max_size_mb, Arc::new(SystemClock))
    }

    pub fn with_clock<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment directory is owned by this process and
        // opened once per store.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn read_entry(&self, key: &[u8]) -> Result<Option<CacheEntry>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.db.get(&rtxn, key).map_err(txn_err)? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// Run `decide` on the current slot contents inside one write
    /// transaction. `decide` returns the new slot contents (`None` removes
    /// the slot, `Some(None)` from the outer option leaves it untouched)
    /// plus a value handed back to the caller.
    fn update_slot<T>(
        &self,
        key: &[u8],
        decide: impl FnOnce(Option<CacheEntry>) -> CoherenceResult<(Option<Option<CacheEntry>>, T)>,
    ) -> CoherenceResult<T> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let current = match self.db.get(&wtxn, key).map_err(txn_err)? {
            Some(bytes) => Some(decode::<CacheEntry>(bytes)?),
            None => None,
        };

        let (change, out) = decide(current)?;
        match change {
            None => return Ok(out),
            Some(Some(entry)) => {
                let bytes = encode(&entry)?;
                self.db.put(&mut wtxn, key, &bytes).map_err(txn_err)?;
            }
            Some(None) => {
                self.db.delete(&mut wtxn, key).map_err(txn_err)?;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(out)
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    async fn entry(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<Option<CacheEntry>> {
        Ok(self.read_entry(&EntryKey::new(entity_type, id).encode())?)
    }

    async fn get(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<Option<CachedRecord>> {
        let now = self.clock.now();
        let record = self
            .read_entry(&EntryKey::new(entity_type, id).encode())?
            .and_then(|e| match e {
                CacheEntry::Record(record) if !record.is_expired(now) => Some(record),
                _ => None,
            });

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
        let key = EntryKey::new(entity_type, id).encode();
        self.update_slot(&key, |current| {
            if mode == WriteMode::RespectTombstone && current.is_some_and(|e| e.is_live_tombstone(now)) {
                return Err(CoherenceError::Suppressed {
                    entity_type: entity_type.clone(),
                    id: id.to_string(),
                });
            }
            let record = CachedRecord::new(entity_type.clone(), id, fields, now, ttl);
            Ok((Some(Some(CacheEntry::Record(record.clone()))), record))
        })
    }

    async fn delete(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<Option<CachedRecord>> {
        let key = EntryKey::new(entity_type, id).encode();
        self.update_slot(&key, |current| match current {
            Some(CacheEntry::Record(record)) => Ok((Some(None), Some(record))),
            _ => Ok((None, None)),
        })
    }

    async fn tombstone(
        &self,
        entity_type: &EntityType,
        id: &str,
        ttl: Duration,
    ) -> CoherenceResult<Option<CachedRecord>> {
        let now = self.clock.now();
        let key = EntryKey::new(entity_type, id).encode();
        let tombstone = CacheEntry::Tombstone(Tombstone::new(entity_type.clone(), id, now, ttl));
        self.update_slot(&key, |current| {
            let replaced = current.and_then(|e| match e {
                CacheEntry::Record(record) => Some(record),
                CacheEntry::Tombstone(_) => None,
            });
            Ok((Some(Some(tombstone)), replaced))
        })
    }

    async fn has_tombstone(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<bool> {
        let now = self.clock.now();
        Ok(self
            .read_entry(&EntryKey::new(entity_type, id).encode())?
            .is_some_and(|e| e.is_live_tombstone(now)))
    }

    async fn clear_tombstone(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<bool> {
        let key = EntryKey::new(entity_type, id).encode();
        self.update_slot(&key, |current| match current {
            Some(CacheEntry::Tombstone(_)) => Ok((Some(None), true)),
            _ => Ok((None, false)),
        })
    }

    async fn purge_expired(&self, entity_type: &EntityType, id: &str) -> CoherenceResult<Option<CacheEntry>> {
        let now = self.clock.now();
        let key = EntryKey::new(entity_type, id).encode();
        self.update_slot(&key, |current| match current {
            Some(entry) if entry.is_expired(now) => Ok((Some(None), Some(entry))),
            _ => Ok((None, None)),
        })
    }

    async fn scan_page(
        &self,
        entity_type: &EntityType,
        after: Option<&str>,
        limit: usize,
    ) -> CoherenceResult<Vec<EntityId>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let prefix = EntryKey::type_prefix(entity_type);
        let start = match after {
            Some(after) => Bound::Excluded(EntryKey::new(entity_type, after).encode()),
            None => Bound::Included(prefix.clone()),
        };
        let range: (Bound<&[u8]>, Bound<&[u8]>) = (start.as_ref().map(Vec::as_slice), Bound::Unbounded);

        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let iter = self.db.range(&rtxn, &range).map_err(txn_err)?;

        let mut ids = Vec::with_capacity(limit.min(1024));
        for item in iter {
            let (key, _) = item.map_err(txn_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(decoded) = EntryKey::decode(key) {
                ids.push(decoded.id().to_string());
            }
            if ids.len() >= limit {
                break;
            }
        }
        Ok(ids)
    }

    async fn try_acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> CoherenceResult<bool> {
        let now = self.clock.now();
        let key = lease_key(name);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let existing = match self.db.get(&wtxn, &key).map_err(txn_err)? {
            Some(bytes) => Some(decode::<LeaseData>(bytes)?),
            None => None,
        };
        if existing.is_some_and(|l| !l.is_available_to(holder, now)) {
            return Ok(false);
        }

        let bytes = encode(&LeaseData::new(name, holder, now, ttl))?;
        self.db.put(&mut wtxn, &key, &bytes).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    async fn release_lease(&self, name: &str, holder: &str) -> CoherenceResult<bool> {
        let key = lease_key(name);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let owned = match self.db.get(&wtxn, &key).map_err(txn_err)? {
            Some(bytes) => decode::<LeaseData>(bytes)?.holder == holder,
            None => false,
        };
        if !owned {
            return Ok(false);
        }

        self.db.delete(&mut wtxn, &key).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    async fn stats(&self) -> CoherenceResult<CacheStats> {
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ..CacheStats::default()
        };

        let namespace = EntryKey::entry_namespace();
        let range: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Included(&namespace[..]), Bound::Unbounded);
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        for item in self.db.range(&rtxn, &range).map_err(txn_err)? {
            let (key, value) = item.map_err(txn_err)?;
            if !key.starts_with(&namespace) {
                break;
            }
            match decode::<CacheEntry>(value)? {
                CacheEntry::Record(_) => stats.records += 1,
                CacheEntry::Tombstone(_) => stats.tombstones += 1,
            }
        }
        Ok(stats)
    }
}
