//! Coherence Test Utilities
//!
//! Shared test infrastructure for the Coherence workspace:
//! - Proptest generators for ids, field maps, and notifications
//! - Fixtures: a small blog schema and an engine wired to mocks
//! - Custom assertions for Coherence error kinds

pub use coherence_storage::{CallCounts, InMemoryCacheStore, MockRecordStore};

pub use coherence_core::{
    CacheEntry, CachedRecord, ChangeNotification, Clock, CoherenceError, CoherenceResult, EngineConfig,
    EntityId, EntitySchema, EntityType, Fields, ManualClock, Reachability, SchemaRegistry, SweepConfig,
    Timestamp, Tombstone, WriteOrigin,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    /// Generate a record id.
    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        "[a-z0-9]{1,12}".prop_map(|s| s)
    }

    /// Generate a scalar JSON field value.
    pub fn arb_field_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            "[a-zA-Z0-9 _-]{0,24}".prop_map(Value::String),
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::Bool),
            Just(Value::Null),
        ]
    }

    /// Generate a field map with up to `max_fields` entries.
    pub fn arb_fields(max_fields: usize) -> impl Strategy<Value = Fields> {
        prop::collection::btree_map("[a-z_]{1,10}", arb_field_value(), 0..=max_fields)
            .prop_map(|m| m.into_iter().collect())
    }

    /// Generate an indexable string value (slugs, handles).
    pub fn arb_slug() -> impl Strategy<Value = String> {
        "[a-z]{1,8}(-[a-z]{1,8}){0,2}".prop_map(|s| s)
    }

    /// Generate an entity type from the [`fixtures::blog_schema`] set.
    ///
    /// [`fixtures::blog_schema`]: crate::fixtures::blog_schema
    pub fn arb_blog_entity_type() -> impl Strategy<Value = EntityType> {
        prop_oneof![
            Just(EntityType::from("author")),
            Just(EntityType::from("post")),
            Just(EntityType::from("comment")),
        ]
    }

    /// Generate a notification for a blog entity, upsert or deletion.
    pub fn arb_notification() -> impl Strategy<Value = ChangeNotification> {
        (
            arb_blog_entity_type(),
            arb_entity_id(),
            arb_fields(4),
            any::<bool>(),
            0i64..1_000_000,
        )
            .prop_map(|(entity_type, record_id, fields, deleted, offset)| ChangeNotification {
                entity_type,
                record_id,
                fields: if deleted { Fields::new() } else { fields },
                timestamp: chrono::DateTime::from_timestamp(1_700_000_000 + offset, 0).unwrap_or_default(),
                deleted,
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use coherence_storage::CacheEngine;
    use std::sync::Arc;
    use std::time::Duration;

    /// Engine over the in-memory store and the mock source of record.
    pub type TestEngine = CacheEngine<InMemoryCacheStore, MockRecordStore>;

    /// Authors are top-level and rechecked hourly; posts and comments are
    /// only reachable through references.
    pub fn blog_schema() -> SchemaRegistry {
        SchemaRegistry::new()
            .with(
                EntitySchema::new("author")
                    .indexed("handle")
                    .recheck_after(Duration::from_secs(3600)),
            )
            .with(
                EntitySchema::new("post")
                    .indexed("slug")
                    .indexed("author_id")
                    .reference("author_id", "author")
                    .referenced_only(),
            )
            .with(
                EntitySchema::new("comment")
                    .indexed("post_id")
                    .reference("post_id", "post")
                    .referenced_only(),
            )
    }

    /// Engine, its mock upstream, and the clock driving both cache TTLs
    /// and engine decisions.
    pub struct TestHarness {
        pub engine: TestEngine,
        pub records: Arc<MockRecordStore>,
        pub clock: Arc<ManualClock>,
    }

    impl TestHarness {
        /// Harness over [`blog_schema`] with default engine settings.
        pub fn new() -> CoherenceResult<Self> {
            Self::with_config(blog_schema(), EngineConfig::default())
        }

        pub fn with_config(schemas: SchemaRegistry, config: EngineConfig) -> CoherenceResult<Self> {
            let clock = Arc::new(ManualClock::starting_now());
            let store = Arc::new(InMemoryCacheStore::with_clock(clock.clone()));
            let records = Arc::new(MockRecordStore::new());
            let engine = CacheEngine::with_clock(store, records.clone(), schemas, config, clock.clone())?;
            Ok(Self { engine, records, clock })
        }

        pub fn entity(&self, name: &str) -> EntityType {
            EntityType::from(name)
        }
    }

    /// Build a field map from a JSON object literal. Non-objects yield an
    /// empty map.
    pub fn fields(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Fields::new(),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert that a result is a not-found error.
    pub fn assert_not_found<T: std::fmt::Debug>(result: &CoherenceResult<T>) {
        assert!(
            matches!(result, Err(CoherenceError::NotFound { .. })),
            "Expected NotFound, got {:?}",
            result
        );
    }

    /// Assert that a result is a tombstone suppression.
    pub fn assert_suppressed<T: std::fmt::Debug>(result: &CoherenceResult<T>) {
        assert!(
            matches!(result, Err(CoherenceError::Suppressed { .. })),
            "Expected Suppressed, got {:?}",
            result
        );
    }

    /// Assert that a result reports the source of record as unreachable.
    pub fn assert_upstream_unavailable<T: std::fmt::Debug>(result: &CoherenceResult<T>) {
        assert!(
            matches!(result, Err(CoherenceError::UpstreamUnavailable { .. })),
            "Expected UpstreamUnavailable, got {:?}",
            result
        );
    }
}

#[cfg(test)]
mod tests {
    use super::assertions::*;
    use super::fixtures::*;
    use serde_json::json;

    #[test]
    fn test_blog_schema_is_valid() {
        let schema = blog_schema();
        assert!(schema.validate().is_ok());
        assert_eq!(schema.len(), 3);
    }

    #[test]
    fn test_fields_helper() {
        let f = fields(json!({"slug": "hello"}));
        assert_eq!(f["slug"], "hello");
        assert!(fields(json!([1, 2])).is_empty());
    }

    #[test]
    fn test_assertions() {
        let post = coherence_core::EntityType::from("post");
        let not_found: super::CoherenceResult<()> = Err(super::CoherenceError::not_found(&post, "p1"));
        assert_not_found(&not_found);
        let suppressed: super::CoherenceResult<()> = Err(super::CoherenceError::Suppressed {
            entity_type: post,
            id: "p1".to_string(),
        });
        assert_suppressed(&suppressed);
    }
}
