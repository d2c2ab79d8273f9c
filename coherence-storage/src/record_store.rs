//! The source-of-record interface consumed by the engine.

use async_trait::async_trait;
use coherence_core::{EntityId, EntityType, Fields, UpstreamError};

/// External, rate-limited, eventually-consistent record store.
///
/// A missing record is a normal answer, not an error: `fetch` returns
/// `Ok(None)`, `exists` returns `Ok(false)`, and `delete` of an absent
/// record succeeds.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch(&self, entity_type: &EntityType, id: &str) -> Result<Option<Fields>, UpstreamError>;

    /// Records whose `field` equals `value`.
    async fn fetch_by_field(
        &self,
        entity_type: &EntityType,
        field: &str,
        value: &str,
    ) -> Result<Vec<(EntityId, Fields)>, UpstreamError>;

    async fn exists(&self, entity_type: &EntityType, id: &str) -> Result<bool, UpstreamError>;

    async fn delete(&self, entity_type: &EntityType, id: &str) -> Result<(), UpstreamError>;

    /// Create or replace a record. Returns the fields as confirmed by the
    /// source of record.
    async fn upsert(&self, entity_type: &EntityType, id: &str, fields: Fields) -> Result<Fields, UpstreamError>;
}
