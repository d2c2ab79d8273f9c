//! Coherence Core - Entity Types
//!
//! Pure data structures shared by the storage and API crates: cached record
//! and tombstone shapes, entity schema declarations, engine configuration,
//! the clock abstraction and the error taxonomy. No I/O lives here.

pub mod clock;
pub mod config;
pub mod entities;
pub mod error;
pub mod identity;
pub mod lease;
pub mod schema;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, SweepConfig};
pub use entities::{CacheEntry, CachedRecord, ChangeNotification, Tombstone, WriteMode, WriteOrigin};
pub use error::{CoherenceError, CoherenceResult, ConfigError, StorageError, UpstreamError};
pub use identity::{EntityId, EntityType, Fields, Timestamp};
pub use lease::{LeaseData, SWEEP_LEASE};
pub use schema::{EntitySchema, Reachability, ReferenceField, SchemaRegistry, MAX_ENTITY_TYPE_LEN};

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    proptest! {
        /// A record is live strictly before its expiry and expired from it on.
        #[test]
        fn prop_record_expiry_matches_ttl(ttl_secs in 1u64..100_000, probe in 0u64..200_000) {
            let now = chrono::Utc::now();
            let record = CachedRecord::new(
                EntityType::from("post"),
                "p1",
                Fields::new(),
                now,
                Duration::from_secs(ttl_secs),
            );
            let at = now + chrono::Duration::seconds(probe as i64);
            prop_assert_eq!(record.is_expired(at), probe >= ttl_secs);
        }

        /// Valid configs never carry a tombstone TTL above the propagation cap.
        #[test]
        fn prop_validated_config_respects_tombstone_cap(
            bound in 1u64..10_000,
            factor in 1.0f64..5.0,
            tombstone in 1u64..60_000,
        ) {
            let config = EngineConfig::default()
                .with_propagation_bound(Duration::from_secs(bound), factor)
                .with_tombstone_ttl(Duration::from_secs(tombstone));
            if config.validate().is_ok() {
                prop_assert!(config.tombstone_ttl <= config.max_tombstone_ttl());
            }
        }
    }
}
