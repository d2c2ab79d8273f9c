//! Error types for Coherence operations

use crate::{EntityId, EntityType};
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Entity type not declared: {entity_type}")]
    UnknownEntityType { entity_type: EntityType },

    #[error("Index not registered: {entity_type}.{field}")]
    UnknownIndex { entity_type: EntityType, field: String },

    #[error("Schema parse error: {reason}")]
    SchemaParse { reason: String },
}

/// Failures talking to the source of record.
///
/// A missing record is not an error: `fetch` returns `Ok(None)` and
/// `exists` returns `Ok(false)`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Record store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Record store call timed out")]
    Timeout,
}

/// Master error type for all Coherence errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoherenceError {
    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: EntityType, id: EntityId },

    #[error("Upstream unavailable for {entity_type} {id}: {reason}")]
    UpstreamUnavailable {
        entity_type: EntityType,
        id: EntityId,
        reason: String,
    },

    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("Write to {entity_type} {id} suppressed by live tombstone")]
    Suppressed { entity_type: EntityType, id: EntityId },

    /// Reserved for stores that detect conflicting concurrent writes. The
    /// bundled stores are last-write-wins and never return it.
    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CoherenceError {
    /// Wrap an upstream failure for a specific entity.
    pub fn upstream(entity_type: &EntityType, id: impl Into<EntityId>, err: UpstreamError) -> Self {
        CoherenceError::UpstreamUnavailable {
            entity_type: entity_type.clone(),
            id: id.into(),
            reason: err.to_string(),
        }
    }

    pub fn not_found(entity_type: &EntityType, id: impl Into<EntityId>) -> Self {
        CoherenceError::NotFound {
            entity_type: entity_type.clone(),
            id: id.into(),
        }
    }

    /// Whether the caller may retry the same operation later and expect a
    /// different outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoherenceError::UpstreamUnavailable { .. }
                | CoherenceError::Storage(StorageError::TransactionFailed { .. })
        )
    }
}

/// Result type alias for Coherence operations.
pub type CoherenceResult<T> = Result<T, CoherenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = CoherenceError::not_found(&EntityType::from("post"), "p1");
        assert_eq!(err.to_string(), "post p1 not found");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_upstream_wraps_reason() {
        let err = CoherenceError::upstream(&EntityType::from("post"), "p1", UpstreamError::Timeout);
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_config_error_converts() {
        let err: CoherenceError = ConfigError::UnknownEntityType {
            entity_type: EntityType::from("ghost"),
        }
        .into();
        assert!(matches!(err, CoherenceError::Config(ConfigError::UnknownEntityType { .. })));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_storage_error_display() {
        let err: CoherenceError = StorageError::LockPoisoned.into();
        assert_eq!(err.to_string(), "Storage error: Storage lock poisoned");
    }
}
