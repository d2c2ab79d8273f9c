//! Secondary indexes over cached records.
//!
//! An index maps (entity type, field, value) to the set of ids whose cached
//! record carries that value. Indexes are a lossy projection of the cache:
//! they may point at records that have since expired, and callers verify
//! every hit against the store before trusting it.

use std::collections::{BTreeSet, HashSet};
use std::sync::RwLock;

use coherence_core::{
    CacheEntry, CoherenceError, CoherenceResult, ConfigError, EntityId, EntityType, Fields, SchemaRegistry,
    StorageError,
};
use dashmap::DashMap;
use futures_util::TryStreamExt;
use serde_json::Value;

use super::traits::{scan_ids, CacheStore};

/// Page size used when rebuilding from the store.
const REBUILD_PAGE_SIZE: usize = 256;

/// Key of one index bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey {
    pub entity_type: EntityType,
    pub field: String,
    pub value: String,
}

/// Canonical index values of a field value.
///
/// Strings index as themselves, numbers and booleans by their JSON text,
/// arrays by each scalar element. Null and objects are not indexed.
pub fn index_values(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(b) => vec![b.to_string()],
        Value::Array(items) => items
            .iter()
            .filter(|v| !v.is_array())
            .flat_map(index_values)
            .collect(),
        Value::Null | Value::Object(_) => Vec::new(),
    }
}

/// Whether `fields[field]` carries `value` under the indexing rules of
/// [`index_values`].
pub fn field_matches(fields: &Fields, field: &str, value: &str) -> bool {
    fields
        .get(field)
        .is_some_and(|v| index_values(v).iter().any(|candidate| candidate == value))
}

/// Concurrent secondary index manager.
#[derive(Debug, Default)]
pub struct IndexManager {
    buckets: DashMap<IndexKey, BTreeSet<EntityId>>,
    registered: RwLock<HashSet<(EntityType, String)>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manager with every index declared in `schemas` ensured.
    pub fn from_schemas(schemas: &SchemaRegistry) -> CoherenceResult<Self> {
        let manager = Self::new();
        for (entity_type, field) in schemas.indexes() {
            manager.ensure_index(entity_type, field)?;
        }
        Ok(manager)
    }

    /// Register an index. Idempotent.
    pub fn ensure_index(&self, entity_type: &EntityType, field: &str) -> CoherenceResult<()> {
        let mut registered = self.registered.write().map_err(|_| StorageError::LockPoisoned)?;
        if registered.insert((entity_type.clone(), field.to_string())) {
            tracing::debug!(entity_type = %entity_type, field, "index registered");
        }
        Ok(())
    }

    pub fn is_registered(&self, entity_type: &EntityType, field: &str) -> bool {
        self.registered
            .read()
            .map(|r| r.contains(&(entity_type.clone(), field.to_string())))
            .unwrap_or(false)
    }

    fn require(&self, entity_type: &EntityType, field: &str) -> CoherenceResult<()> {
        if self.is_registered(entity_type, field) {
            Ok(())
        } else {
            Err(CoherenceError::Config(ConfigError::UnknownIndex {
                entity_type: entity_type.clone(),
                field: field.to_string(),
            }))
        }
    }

    fn key(entity_type: &EntityType, field: &str, value: &str) -> IndexKey {
        IndexKey {
            entity_type: entity_type.clone(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn index_put(&self, entity_type: &EntityType, field: &str, value: &str, id: &str) -> CoherenceResult<()> {
        self.require(entity_type, field)?;
        self.buckets
            .entry(Self::key(entity_type, field, value))
            .or_default()
            .insert(id.to_string());
        Ok(())
    }

    pub fn index_remove(&self, entity_type: &EntityType, field: &str, value: &str, id: &str) -> CoherenceResult<()> {
        self.require(entity_type, field)?;
        let key = Self::key(entity_type, field, value);
        if let Some(mut ids) = self.buckets.get_mut(&key) {
            ids.remove(id);
        }
        self.buckets.remove_if(&key, |_, ids| ids.is_empty());
        Ok(())
    }

    pub fn index_lookup(&self, entity_type: &EntityType, field: &str, value: &str) -> CoherenceResult<BTreeSet<EntityId>> {
        self.require(entity_type, field)?;
        Ok(self
            .buckets
            .get(&Self::key(entity_type, field, value))
            .map(|ids| ids.clone())
            .unwrap_or_default())
    }

    /// Fields of `entity_type` that have a registered index.
    pub fn indexed_fields(&self, entity_type: &EntityType) -> Vec<String> {
        self.registered
            .read()
            .map(|r| {
                let mut fields: Vec<String> = r
                    .iter()
                    .filter(|(t, _)| t == entity_type)
                    .map(|(_, f)| f.clone())
                    .collect();
                fields.sort();
                fields
            })
            .unwrap_or_default()
    }

    /// Add index entries for every indexed field present in `fields`.
    pub fn add_record(&self, entity_type: &EntityType, id: &str, fields: &Fields) -> CoherenceResult<()> {
        for field in self.indexed_fields(entity_type) {
            if let Some(value) = fields.get(&field) {
                for v in index_values(value) {
                    self.index_put(entity_type, &field, &v, id)?;
                }
            }
        }
        Ok(())
    }

    /// Remove index entries derived from `fields`.
    pub fn remove_record(&self, entity_type: &EntityType, id: &str, fields: &Fields) -> CoherenceResult<()> {
        for field in self.indexed_fields(entity_type) {
            if let Some(value) = fields.get(&field) {
                for v in index_values(value) {
                    self.index_remove(entity_type, &field, &v, id)?;
                }
            }
        }
        Ok(())
    }

    /// Total number of (bucket, id) pairs held.
    pub fn entry_count(&self) -> usize {
        self.buckets.iter().map(|b| b.value().len()).sum()
    }

    /// Drop every index entry and repopulate from live records in `store`.
    ///
    /// Registers every index declared in `schemas` first. Returns the number
    /// of records indexed.
    pub async fn rebuild<S>(&self, store: &S, schemas: &SchemaRegistry) -> CoherenceResult<usize>
    where
        S: CacheStore + ?Sized,
    {
        for (entity_type, field) in schemas.indexes() {
            self.ensure_index(entity_type, field)?;
        }
        self.buckets.clear();

        let mut indexed = 0usize;
        for schema in schemas.iter() {
            if schema.indexed_fields.is_empty() {
                continue;
            }
            let entity_type = &schema.entity_type;
            let mut ids = Box::pin(scan_ids(store, entity_type, REBUILD_PAGE_SIZE));
            while let Some(id) = ids.try_next().await? {
                if let Some(record) = store.get(entity_type, &id).await? {
                    self.add_record(entity_type, &id, &record.fields)?;
                    indexed += 1;
                }
            }
        }

        tracing::info!(records = indexed, entries = self.entry_count(), "secondary indexes rebuilt");
        Ok(indexed)
    }

    /// Remove entries derived from whatever record `entry` holds.
    pub fn remove_entry(&self, entity_type: &EntityType, id: &str, entry: &CacheEntry) -> CoherenceResult<()> {
        match entry {
            CacheEntry::Record(record) => self.remove_record(entity_type, id, &record.fields),
            CacheEntry::Tombstone(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCacheStore;
    use coherence_core::{EntitySchema, WriteMode};
    use serde_json::json;
    use std::time::Duration;

    fn post() -> EntityType {
        EntityType::from("post")
    }

    fn fields(v: Value) -> Fields {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_index_values() {
        assert_eq!(index_values(&json!("a")), vec!["a"]);
        assert_eq!(index_values(&json!(42)), vec!["42"]);
        assert_eq!(index_values(&json!(true)), vec!["true"]);
        assert_eq!(index_values(&json!(["x", 1, null, {"k": 1}])), vec!["x", "1"]);
        assert!(index_values(&json!(null)).is_empty());
        assert!(index_values(&json!({"a": 1})).is_empty());
    }

    #[test]
    fn test_field_matches() {
        let f = fields(json!({"slug": "a", "n": 3, "tags": ["x", "y"]}));
        assert!(field_matches(&f, "slug", "a"));
        assert!(field_matches(&f, "n", "3"));
        assert!(field_matches(&f, "tags", "y"));
        assert!(!field_matches(&f, "slug", "b"));
        assert!(!field_matches(&f, "missing", "a"));
    }

    #[test]
    fn test_unregistered_index_is_config_error() {
        let manager = IndexManager::new();
        let err = manager.index_put(&post(), "slug", "hello", "p1").unwrap_err();
        assert!(matches!(err, CoherenceError::Config(ConfigError::UnknownIndex { .. })));
        assert!(manager.index_lookup(&post(), "slug", "hello").is_err());
    }

    #[test]
    fn test_put_lookup_remove() {
        let manager = IndexManager::new();
        manager.ensure_index(&post(), "slug").expect("ensure");
        manager.ensure_index(&post(), "slug").expect("ensure twice");

        manager.index_put(&post(), "slug", "hello", "p1").expect("put");
        manager.index_put(&post(), "slug", "hello", "p2").expect("put");
        let ids = manager.index_lookup(&post(), "slug", "hello").expect("lookup");
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["p1", "p2"]);

        manager.index_remove(&post(), "slug", "hello", "p1").expect("remove");
        manager.index_remove(&post(), "slug", "hello", "p2").expect("remove");
        assert!(manager.index_lookup(&post(), "slug", "hello").expect("lookup").is_empty());
        assert_eq!(manager.entry_count(), 0);
    }

    #[test]
    fn test_add_and_remove_record() {
        let manager = IndexManager::new();
        manager.ensure_index(&post(), "tags").expect("ensure");
        let f = fields(json!({"tags": ["rust", "cache"], "title": "ignored"}));
        manager.add_record(&post(), "p1", &f).expect("add");
        assert_eq!(manager.entry_count(), 2);
        assert!(manager.index_lookup(&post(), "tags", "rust").expect("lookup").contains("p1"));

        manager.remove_record(&post(), "p1", &f).expect("remove");
        assert_eq!(manager.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent_and_skips_dead_records() {
        let store = InMemoryCacheStore::new();
        let ttl = Duration::from_secs(60);
        store
            .set(&post(), "p1", fields(json!({"slug": "one"})), ttl, WriteMode::RespectTombstone)
            .await
            .expect("set");
        store
            .set(&post(), "p2", fields(json!({"slug": "two"})), ttl, WriteMode::RespectTombstone)
            .await
            .expect("set");
        store.tombstone(&post(), "p3", ttl).await.expect("tombstone");

        let schemas = SchemaRegistry::new().with(EntitySchema::new("post").indexed("slug"));
        let manager = IndexManager::new();
        manager.index_put_unchecked_for_test("stale");

        assert_eq!(manager.rebuild(&store, &schemas).await.expect("rebuild"), 2);
        assert_eq!(manager.rebuild(&store, &schemas).await.expect("rebuild"), 2);
        assert_eq!(manager.entry_count(), 2);
        assert!(manager.index_lookup(&post(), "slug", "one").expect("lookup").contains("p1"));
    }

    impl IndexManager {
        fn index_put_unchecked_for_test(&self, value: &str) {
            self.buckets
                .entry(IndexManager::key(&post(), "slug", value))
                .or_default()
                .insert("ghost".to_string());
        }
    }
}
