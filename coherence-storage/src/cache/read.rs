//! Read metadata returned by cache-aside lookups.
//!
//! Every read says where its data came from and how old it is, so callers
//! can reason about staleness instead of assuming freshness.

use coherence_core::{CachedRecord, Timestamp};
use std::time::Duration;

/// Where a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// Live record found in the cache.
    Cache,
    /// Fetched from the source of record on a miss.
    Upstream,
}

/// Result of a cache read, carrying staleness metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    source: ReadSource,
    cached_at: Timestamp,
    expires_at: Timestamp,
}

impl<T> CacheRead<T> {
    pub fn new(value: T, source: ReadSource, cached_at: Timestamp, expires_at: Timestamp) -> Self {
        Self {
            value,
            source,
            cached_at,
            expires_at,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    pub fn was_cache_hit(&self) -> bool {
        self.source == ReadSource::Cache
    }

    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }

    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    /// How long before `now` the value was last confirmed upstream.
    pub fn staleness(&self, now: Timestamp) -> Duration {
        if now > self.cached_at {
            (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        }
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            source: self.source,
            cached_at: self.cached_at,
            expires_at: self.expires_at,
        }
    }
}

impl CacheRead<CachedRecord> {
    /// Wrap a stored record with its own timestamps.
    pub fn from_record(record: CachedRecord, source: ReadSource) -> Self {
        let (cached_at, expires_at) = (record.cached_at, record.expires_at);
        Self::new(record, source, cached_at, expires_at)
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
