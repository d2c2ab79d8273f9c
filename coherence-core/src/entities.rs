//! Cache entry structures

use crate::{EntityId, EntityType, Fields, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Convert a std duration into a chrono duration, saturating on overflow.
pub(crate) fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
}

/// A record held in the cache, as last confirmed by the source of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    pub entity_type: EntityType,
    pub id: EntityId,
    pub fields: Fields,
    pub cached_at: Timestamp,
    pub expires_at: Timestamp,
}

impl CachedRecord {
    /// Build a record cached at `now` that lives for `ttl`.
    pub fn new(
        entity_type: EntityType,
        id: impl Into<EntityId>,
        fields: Fields,
        now: Timestamp,
        ttl: Duration,
    ) -> Self {
        Self {
            entity_type,
            id: id.into(),
            fields,
            cached_at: now,
            expires_at: now + chrono_ttl(ttl),
        }
    }

    /// Check if the record has expired.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Age of the record at `now`.
    pub fn age(&self, now: Timestamp) -> Duration {
        (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Short-lived negative cache marker left behind by a deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub entity_type: EntityType,
    pub id: EntityId,
    pub deleted_at: Timestamp,
    pub expires_at: Timestamp,
}

impl Tombstone {
    pub fn new(entity_type: EntityType, id: impl Into<EntityId>, now: Timestamp, ttl: Duration) -> Self {
        Self {
            entity_type,
            id: id.into(),
            deleted_at: now,
            expires_at: now + chrono_ttl(ttl),
        }
    }

    /// Check if the tombstone has expired.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime, or `None` once expired.
    pub fn remaining(&self, now: Timestamp) -> Option<Duration> {
        if self.is_expired(now) {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }
}

/// Contents of one (entity type, id) slot in the cache store.
///
/// A slot holds either a record or a tombstone, never both, so writing a
/// tombstone atomically evicts the record it replaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheEntry {
    Record(CachedRecord),
    Tombstone(Tombstone),
}

impl CacheEntry {
    /// The record, if this slot holds one (expired or not).
    pub fn as_record(&self) -> Option<&CachedRecord> {
        match self {
            CacheEntry::Record(record) => Some(record),
            CacheEntry::Tombstone(_) => None,
        }
    }

    /// The tombstone, if this slot holds one (expired or not).
    pub fn as_tombstone(&self) -> Option<&Tombstone> {
        match self {
            CacheEntry::Tombstone(tombstone) => Some(tombstone),
            CacheEntry::Record(_) => None,
        }
    }

    /// Live record at `now`.
    pub fn live_record(&self, now: Timestamp) -> Option<&CachedRecord> {
        self.as_record().filter(|r| !r.is_expired(now))
    }

    /// Whether this slot holds a tombstone that has not yet expired.
    pub fn is_live_tombstone(&self, now: Timestamp) -> bool {
        self.as_tombstone().is_some_and(|t| !t.is_expired(now))
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        match self {
            CacheEntry::Record(record) => record.is_expired(now),
            CacheEntry::Tombstone(tombstone) => tombstone.is_expired(now),
        }
    }
}

/// How a cache write treats a live tombstone in the target slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Fail with `Suppressed` if a live tombstone occupies the slot.
    #[default]
    RespectTombstone,
    /// Clear any tombstone as part of the same write.
    ClearTombstone,
}

/// Where a `create_or_update` originates, which decides whether the
/// source of record still has to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// A change notification: the source of record already holds the data.
    Notification,
    /// An application write path.
    Application {
        /// The caller already wrote to the source of record.
        upstream_written: bool,
    },
}

impl WriteOrigin {
    pub fn needs_upstream_write(&self) -> bool {
        matches!(self, WriteOrigin::Application { upstream_written: false })
    }
}

/// Change notification as delivered by the source of record.
///
/// Carries the full current field set, never a diff. Delivery is
/// at-least-once and unordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub entity_type: EntityType,
    pub record_id: EntityId,
    #[serde(default)]
    pub fields: Fields,
    pub timestamp: Timestamp,
    /// The record was deleted upstream.
    #[serde(default)]
    pub deleted: bool,
}

impl ChangeNotification {
    /// Notification for an upserted record, stamped now.
    pub fn upsert(entity_type: impl Into<EntityType>, record_id: impl Into<EntityId>, fields: Fields) -> Self {
        Self {
            entity_type: entity_type.into(),
            record_id: record_id.into(),
            fields,
            timestamp: Utc::now(),
            deleted: false,
        }
    }

    /// Notification for a deleted record, stamped now.
    pub fn deletion(entity_type: impl Into<EntityType>, record_id: impl Into<EntityId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            record_id: record_id.into(),
            fields: Fields::new(),
            timestamp: Utc::now(),
            deleted: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: serde_json::Value) -> Fields {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_record_expiry_boundary() {
        let now = Utc::now();
        let record = CachedRecord::new(
            EntityType::from("post"),
            "p1",
            fields(json!({"title": "hello"})),
            now,
            Duration::from_secs(60),
        );
        assert!(!record.is_expired(now));
        assert!(!record.is_expired(now + chrono::Duration::seconds(59)));
        assert!(record.is_expired(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_tombstone_remaining() {
        let now = Utc::now();
        let t = Tombstone::new(EntityType::from("post"), "p1", now, Duration::from_secs(30));
        assert_eq!(t.remaining(now), Some(Duration::from_secs(30)));
        assert_eq!(t.remaining(now + chrono::Duration::seconds(31)), None);
    }

    #[test]
    fn test_cache_entry_live_views() {
        let now = Utc::now();
        let entry = CacheEntry::Tombstone(Tombstone::new(
            EntityType::from("post"),
            "p1",
            now,
            Duration::from_secs(10),
        ));
        assert!(entry.is_live_tombstone(now));
        assert!(entry.live_record(now).is_none());
        assert!(!entry.is_live_tombstone(now + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_cache_entry_json_is_tagged() {
        let now = Utc::now();
        let entry = CacheEntry::Record(CachedRecord::new(
            EntityType::from("post"),
            "p1",
            fields(json!({"n": 1})),
            now,
            Duration::from_secs(10),
        ));
        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["kind"], "record");
        let back: CacheEntry = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, entry);
    }

    #[test]
    fn test_notification_deleted_defaults_false() {
        let raw = json!({
            "entity_type": "post",
            "record_id": "p1",
            "fields": {"title": "x"},
            "timestamp": "2024-01-01T00:00:00Z"
        });
        let n: ChangeNotification = serde_json::from_value(raw).expect("deserialize");
        assert!(!n.deleted);
        assert_eq!(n.fields["title"], "x");
    }

    #[test]
    fn test_write_origin_upstream_requirement() {
        assert!(!WriteOrigin::Notification.needs_upstream_write());
        assert!(WriteOrigin::Application { upstream_written: false }.needs_upstream_write());
        assert!(!WriteOrigin::Application { upstream_written: true }.needs_upstream_write());
    }
}
