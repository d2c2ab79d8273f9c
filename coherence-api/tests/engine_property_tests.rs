//! Property-Based Tests for the Cache-Aside Protocol
//!
//! - Deleted ids read as `NotFound` with no upstream call while tombstoned
//! - Change notifications always clear a live tombstone
//! - `create_or_update` followed by `get_by_id` returns the fields unchanged
//! - Replaying a notification N times equals applying it once

use coherence_storage::{CacheStore, ReadSource};
use coherence_test_utils::assertions::assert_not_found;
use coherence_test_utils::fixtures::{fields, TestHarness};
use coherence_test_utils::generators::{arb_entity_id, arb_fields, arb_notification, arb_slug};
use coherence_test_utils::{ChangeNotification, CoherenceError, EntityType, Fields, WriteOrigin};
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn test_harness() -> Result<TestHarness, TestCaseError> {
    TestHarness::new().map_err(|e| TestCaseError::fail(format!("Failed to build harness: {}", e)))
}

fn fail(e: CoherenceError) -> TestCaseError {
    TestCaseError::fail(e.to_string())
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// After a successful delete, reads are answered from the tombstone
    /// until it expires, then go upstream exactly once.
    #[test]
    fn prop_delete_suppresses_reads_until_tombstone_expires(
        id in arb_entity_id(),
        record in arb_fields(4),
        probe_secs in 1u64..600,
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let h = test_harness()?;
            let author = EntityType::from("author");
            h.records.insert("author", id.clone(), record.clone());
            h.engine.get_by_id(&author, &id).await.map_err(fail)?;

            h.engine.delete(&author, &id).await.map_err(fail)?;
            h.records.reset_calls();

            h.clock.advance(Duration::from_secs(probe_secs));
            assert_not_found(&h.engine.get_by_id(&author, &id).await);
            prop_assert_eq!(h.records.calls().total(), 0);

            let tombstone_ttl = h.engine.config().tombstone_ttl;
            h.clock.advance(tombstone_ttl);
            assert_not_found(&h.engine.get_by_id(&author, &id).await);
            prop_assert_eq!(h.records.calls().fetch, 1);
            Ok(())
        })?;
    }

    /// A notification upsert re-creates a tombstoned id.
    #[test]
    fn prop_notification_clears_tombstone(id in arb_entity_id(), record in arb_fields(4)) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let h = test_harness()?;
            let post = EntityType::from("post");
            h.records.insert("post", id.clone(), Fields::new());
            h.engine.delete(&post, &id).await.map_err(fail)?;
            prop_assert!(h.engine.store().has_tombstone(&post, &id).await.map_err(fail)?);

            let notification = ChangeNotification::upsert("post", id.clone(), record.clone());
            h.engine.apply_notification(&notification).await.map_err(fail)?;

            prop_assert!(!h.engine.store().has_tombstone(&post, &id).await.map_err(fail)?);
            let read = h.engine.get_by_id(&post, &id).await.map_err(fail)?;
            prop_assert_eq!(&read.value().fields, &record);
            Ok(())
        })?;
    }

    /// Cached fields come back exactly as written.
    #[test]
    fn prop_write_then_read_round_trips(id in arb_entity_id(), record in arb_fields(6), upstream_written in any::<bool>()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let h = test_harness()?;
            let comment = EntityType::from("comment");
            h.engine
                .create_or_update(&comment, &id, record.clone(), WriteOrigin::Application { upstream_written })
                .await
                .map_err(fail)?;
            h.records.reset_calls();

            let read = h.engine.get_by_id(&comment, &id).await.map_err(fail)?;
            prop_assert_eq!(read.source(), ReadSource::Cache);
            prop_assert_eq!(&read.value().fields, &record);
            prop_assert_eq!(h.records.calls().total(), 0);
            Ok(())
        })?;
    }

    /// Duplicate delivery converges to the single-delivery state.
    #[test]
    fn prop_notification_replay_is_idempotent(notification in arb_notification(), replays in 2usize..6) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let once = test_harness()?;
            let many = test_harness()?;

            once.engine.apply_notification(&notification).await.map_err(fail)?;
            for _ in 0..replays {
                many.engine.apply_notification(&notification).await.map_err(fail)?;
            }

            let entity_type = &notification.entity_type;
            let id = notification.record_id.as_str();
            for h in [&once, &many] {
                prop_assert_eq!(
                    h.engine.store().has_tombstone(entity_type, id).await.map_err(fail)?,
                    notification.deleted
                );
            }
            let a = once.engine.store().get(entity_type, id).await.map_err(fail)?.map(|r| r.fields);
            let b = many.engine.store().get(entity_type, id).await.map_err(fail)?.map(|r| r.fields);
            prop_assert_eq!(a, b);
            Ok(())
        })?;
    }

    /// Index entries follow field changes made through notifications.
    #[test]
    fn prop_index_tracks_latest_value(id in arb_entity_id(), first in arb_slug(), second in arb_slug()) {
        prop_assume!(first != second);
        let rt = test_runtime()?;
        rt.block_on(async {
            let h = test_harness()?;
            let post = EntityType::from("post");
            for slug in [&first, &second] {
                let notification = ChangeNotification::upsert("post", id.clone(), fields(json!({"slug": slug})));
                h.engine.apply_notification(&notification).await.map_err(fail)?;
            }

            let hits = h.engine.get_by_field(&post, "slug", &second).await.map_err(fail)?;
            prop_assert_eq!(hits.len(), 1);
            prop_assert!(h.engine.indexes().index_lookup(&post, "slug", &first).map_err(fail)?.is_empty());
            Ok(())
        })?;
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn scenario_delete_then_read_after_tombstone_expiry() -> Result<(), CoherenceError> {
    let h = TestHarness::new()?;
    let author = EntityType::from("author");
    h.records.insert("author", "e1", fields(json!({"handle": "e1"})));
    h.engine.get_by_id(&author, "e1").await?;

    h.engine.delete(&author, "e1").await?;
    h.records.reset_calls();

    h.clock.advance(Duration::from_secs(1));
    assert_not_found(&h.engine.get_by_id(&author, "e1").await);
    assert_eq!(h.records.calls().total(), 0);

    h.clock.advance(h.engine.config().tombstone_ttl);
    assert_not_found(&h.engine.get_by_id(&author, "e1").await);
    assert_eq!(h.records.calls().total(), 1);
    Ok(())
}

#[tokio::test]
async fn scenario_out_of_order_notifications_last_applied_wins() -> Result<(), CoherenceError> {
    let h = TestHarness::new()?;
    let author = EntityType::from("author");

    let mut newer = ChangeNotification::upsert("author", "e2", fields(json!({"name": "A"})));
    let older = ChangeNotification {
        fields: fields(json!({"name": "B"})),
        timestamp: newer.timestamp - chrono::Duration::seconds(30),
        ..newer.clone()
    };
    newer.timestamp += chrono::Duration::seconds(1);

    h.engine.apply_notification(&newer).await?;
    h.engine.apply_notification(&older).await?;

    let read = h.engine.get_by_id(&author, "e2").await?;
    assert_eq!(read.value().fields, fields(json!({"name": "B"})));
    Ok(())
}

#[tokio::test]
async fn scenario_upstream_outage_leaves_cache_untouched() -> Result<(), CoherenceError> {
    let h = TestHarness::new()?;
    let author = EntityType::from("author");
    h.records.set_unavailable(true);

    let result = h.engine.get_by_id(&author, "a1").await;
    coherence_test_utils::assertions::assert_upstream_unavailable(&result);
    assert!(h.engine.store().entry(&author, "a1").await?.is_none());

    let result = h.engine.delete(&author, "a1").await;
    coherence_test_utils::assertions::assert_upstream_unavailable(&result);
    assert!(!h.engine.store().has_tombstone(&author, "a1").await?);
    Ok(())
}
