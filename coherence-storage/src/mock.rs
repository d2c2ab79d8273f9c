//! In-memory record store double with call accounting and failure injection.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use coherence_core::{EntityId, EntityType, Fields, UpstreamError};

use crate::cache::field_matches;
use crate::record_store::RecordStore;

type RecordKey = (EntityType, EntityId);

/// Snapshot of calls made against a [`MockRecordStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub fetch: u64,
    pub fetch_by_field: u64,
    pub exists: u64,
    pub delete: u64,
    pub upsert: u64,
}

impl CallCounts {
    pub fn total(&self) -> u64 {
        self.fetch + self.fetch_by_field + self.exists + self.delete + self.upsert
    }
}

/// Mock source of record.
#[derive(Debug, Default)]
pub struct MockRecordStore {
    records: RwLock<BTreeMap<RecordKey, Fields>>,
    failing_ids: RwLock<HashSet<RecordKey>>,
    unavailable: AtomicBool,
    delay_ms: AtomicU64,
    fetch_calls: AtomicU64,
    fetch_by_field_calls: AtomicU64,
    exists_calls: AtomicU64,
    delete_calls: AtomicU64,
    upsert_calls: AtomicU64,
}

impl MockRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record without counting a call.
    pub fn insert(&self, entity_type: impl Into<EntityType>, id: impl Into<EntityId>, fields: Fields) {
        self.records
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert((entity_type.into(), id.into()), fields);
    }

    /// Remove a record behind the cache's back, without counting a call.
    pub fn remove(&self, entity_type: impl Into<EntityType>, id: impl Into<EntityId>) -> Option<Fields> {
        self.records
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&(entity_type.into(), id.into()))
    }

    pub fn get(&self, entity_type: impl Into<EntityType>, id: impl Into<EntityId>) -> Option<Fields> {
        self.records
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(entity_type.into(), id.into()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every call fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make calls touching one record fail with `Unavailable`.
    pub fn fail_id(&self, entity_type: impl Into<EntityType>, id: impl Into<EntityId>) {
        self.failing_ids
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert((entity_type.into(), id.into()));
    }

    /// Delay every call by `delay` (combine with paused tokio time).
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            fetch: self.fetch_calls.load(Ordering::SeqCst),
            fetch_by_field: self.fetch_by_field_calls.load(Ordering::SeqCst),
            exists: self.exists_calls.load(Ordering::SeqCst),
            delete: self.delete_calls.load(Ordering::SeqCst),
            upsert: self.upsert_calls.load(Ordering::SeqCst),
        }
    }

    pub fn reset_calls(&self) {
        for counter in [
            &self.fetch_calls,
            &self.fetch_by_field_calls,
            &self.exists_calls,
            &self.delete_calls,
            &self.upsert_calls,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    async fn enter(&self, counter: &AtomicU64, key: Option<(&EntityType, &str)>) -> Result<(), UpstreamError> {
        counter.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(UpstreamError::Unavailable {
                reason: "mock record store is down".to_string(),
            });
        }
        if let Some((entity_type, id)) = key {
            let failing = self
                .failing_ids
                .read()
                .unwrap_or_else(|p| p.into_inner())
                .contains(&(entity_type.clone(), id.to_string()));
            if failing {
                return Err(UpstreamError::Unavailable {
                    reason: format!("mock failure for {entity_type} {id}"),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MockRecordStore {
    async fn fetch(&self, entity_type: &EntityType, id: &str) -> Result<Option<Fields>, UpstreamError> {
        self.enter(&self.fetch_calls, Some((entity_type, id))).await?;
        Ok(self.get(entity_type.clone(), id))
    }

    async fn fetch_by_field(
        &self,
        entity_type: &EntityType,
        field: &str,
        value: &str,
    ) -> Result<Vec<(EntityId, Fields)>, UpstreamError> {
        self.enter(&self.fetch_by_field_calls, None).await?;
        let records = self.records.read().unwrap_or_else(|p| p.into_inner());
        Ok(records
            .iter()
            .filter(|((t, _), _)| t == entity_type)
            .filter(|(_, fields)| field_matches(fields, field, value))
            .map(|((_, id), fields)| (id.clone(), fields.clone()))
            .collect())
    }

    async fn exists(&self, entity_type: &EntityType, id: &str) -> Result<bool, UpstreamError> {
        self.enter(&self.exists_calls, Some((entity_type, id))).await?;
        Ok(self.get(entity_type.clone(), id).is_some())
    }

    async fn delete(&self, entity_type: &EntityType, id: &str) -> Result<(), UpstreamError> {
        self.enter(&self.delete_calls, Some((entity_type, id))).await?;
        self.remove(entity_type.clone(), id);
        Ok(())
    }

    async fn upsert(&self, entity_type: &EntityType, id: &str, fields: Fields) -> Result<Fields, UpstreamError> {
        self.enter(&self.upsert_calls, Some((entity_type, id))).await?;
        self.insert(entity_type.clone(), id, fields.clone());
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: serde_json::Value) -> Fields {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_counts_and_failures() {
        let mock = MockRecordStore::new();
        let post = EntityType::from("post");
        mock.insert("post", "p1", fields(json!({"slug": "a"})));

        assert!(mock.fetch(&post, "p1").await.expect("fetch").is_some());
        assert!(!mock.exists(&post, "p2").await.expect("exists"));

        mock.fail_id("post", "p1");
        assert!(mock.fetch(&post, "p1").await.is_err());

        mock.set_unavailable(true);
        assert!(mock.exists(&post, "p2").await.is_err());

        let calls = mock.calls();
        assert_eq!((calls.fetch, calls.exists, calls.total()), (2, 2, 4));
        mock.reset_calls();
        assert_eq!(mock.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_fetch_by_field_matches_array_elements() {
        let mock = MockRecordStore::new();
        let post = EntityType::from("post");
        mock.insert("post", "p1", fields(json!({"tags": ["rust", "db"]})));
        mock.insert("post", "p2", fields(json!({"tags": ["go"]})));
        mock.insert("author", "a1", fields(json!({"tags": ["rust"]})));

        let hits = mock.fetch_by_field(&post, "tags", "rust").await.expect("fetch");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "p1");
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok() {
        let mock = MockRecordStore::new();
        mock.delete(&EntityType::from("post"), "ghost").await.expect("delete");
        assert_eq!(mock.calls().delete, 1);
    }
}
