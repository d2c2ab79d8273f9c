//! Cache store layer: slot storage, key layout, secondary indexes and
//! read metadata.
//!
//! Two backends implement [`CacheStore`]:
//! - [`InMemoryCacheStore`] for tests and single-process deployments
//! - [`LmdbCacheStore`] for a persistent, memory-mapped cache
//!
//! Both enforce the same slot contract: one (entity type, id) slot holds a
//! record or a tombstone, never both, and a write that would overwrite a
//! live tombstone is rejected unless the caller asks to clear it.

pub mod index;
pub mod key;
pub mod lmdb_backend;
pub mod memory;
pub mod read;
pub mod traits;

pub use index::{field_matches, index_values, IndexKey, IndexManager};
pub use key::EntryKey;
pub use lmdb_backend::{LmdbCacheError, LmdbCacheStore};
pub use memory::InMemoryCacheStore;
pub use read::{CacheRead, ReadSource};
pub use traits::{scan_ids, CacheStats, CacheStore};
