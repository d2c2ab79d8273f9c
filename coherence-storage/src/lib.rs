//! Coherence Storage - Cache Stores and Engine
//!
//! Slot storage for cached records and tombstones, secondary indexes, the
//! source-of-record seam, the cache-aside engine built on top of them and
//! the reconciling sweep that catches deletions no notification reported.

pub mod cache;
pub mod engine;
pub mod mock;
pub mod record_store;
pub mod sweep;

pub use cache::{
    field_matches, index_values, scan_ids, CacheRead, CacheStats, CacheStore, EntryKey, InMemoryCacheStore,
    IndexKey, IndexManager, LmdbCacheError, LmdbCacheStore, ReadSource,
};
pub use engine::{CacheEngine, EngineStats, EngineStatsSnapshot, NotificationAction};
pub use mock::{CallCounts, MockRecordStore};
pub use record_store::RecordStore;
pub use sweep::{Reconciler, SweepReport};
