//! HTTP error mapping.
//!
//! Engine failures become an [`ApiError`] carrying an [`ErrorCode`]; the
//! code picks the status and the body is `{"code", "message", "details"}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coherence_core::{CoherenceError, ConfigError, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Machine-readable error category, serialized as `SCREAMING_SNAKE_CASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Notification signature missing, malformed or forged (401)
    Unauthorized,

    /// Payload could not be decoded (400)
    InvalidInput,

    /// Entity type is not declared in the schema registry (400)
    UnknownEntityType,

    /// Confirmed absent upstream or tombstoned (404)
    EntityNotFound,

    /// Write rejected by a live tombstone (409)
    Suppressed,

    /// Reserved for conflicting concurrent writes (409). Writes are
    /// last-write-wins today, so only `CoherenceError::Conflict` maps here.
    StateConflict,

    /// 500
    InternalError,

    /// Cache store read or write failed (500)
    StorageError,

    /// Source of record unreachable or timed out; retryable (503)
    UpstreamUnavailable,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidInput | ErrorCode::UnknownEntityType => StatusCode::BAD_REQUEST,
            ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,
            ErrorCode::Suppressed | ErrorCode::StateConflict => StatusCode::CONFLICT,
            ErrorCode::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError | ErrorCode::StorageError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Error body returned by every route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured context (offending field, entity type, ...).
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn entity_not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::EntityNotFound, format!("No {} {}", entity_type, id))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamUnavailable, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<CoherenceError> for ApiError {
    fn from(err: CoherenceError) -> Self {
        match &err {
            CoherenceError::NotFound { entity_type, id } => ApiError::entity_not_found(entity_type.as_str(), id),
            CoherenceError::UpstreamUnavailable { .. } => {
                tracing::warn!(error = %err, "Upstream unavailable");
                ApiError::upstream_unavailable(err.to_string())
            }
            CoherenceError::Unauthorized { reason } => ApiError::unauthorized(reason.clone()),
            CoherenceError::Suppressed { .. } => ApiError::new(ErrorCode::Suppressed, err.to_string()),
            CoherenceError::Conflict { reason } => ApiError::new(ErrorCode::StateConflict, reason.clone()),
            CoherenceError::Config(ConfigError::UnknownEntityType { .. }) => {
                ApiError::new(ErrorCode::UnknownEntityType, err.to_string())
            }
            CoherenceError::Config(_) => {
                tracing::error!(error = %err, "Configuration error");
                ApiError::internal_error(err.to_string())
            }
            CoherenceError::Storage(storage) => {
                // Details stay in the log.
                tracing::error!(error = %storage, "Cache store error");
                let message = match storage {
                    StorageError::LockPoisoned => "Cache store lock poisoned",
                    _ => "Cache store operation failed",
                };
                ApiError::new(ErrorCode::StorageError, message)
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Malformed JSON: {}", err))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
