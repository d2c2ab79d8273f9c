//! Change ingestion endpoint.
//!
//! The source of record pushes one notification per changed record, signed
//! with HMAC-SHA256 over the raw body:
//!
//! ```text
//! POST /v1/changes
//! X-Coherence-Signature: sha256=<hex>
//!
//! {"entity_type": "post", "record_id": "p1", "fields": {...}, "timestamp": "..."}
//! ```
//!
//! Delivery is at-least-once and unordered. Replays are idempotent and the
//! last notification applied wins.

use std::sync::Arc;

use axum::{body::Bytes, extract::State, http::HeaderMap, routing::post, Json, Router};
use coherence_core::{ChangeNotification, EntityId, EntityType, Timestamp};
use coherence_storage::NotificationAction;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{ApiError, ApiResult};
use crate::state::{ApiEngine, AppState};
use crate::telemetry::CoherenceMetrics;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-coherence-signature";
const SIGNATURE_PREFIX: &str = "sha256=";

/// Acknowledgement returned for an applied notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestAck {
    pub entity_type: EntityType,
    pub record_id: EntityId,
    /// `upserted` or `deleted`
    pub action: String,
    pub applied_at: Timestamp,
}

/// Compute the `X-Coherence-Signature` value for `payload`.
pub fn sign_payload(payload: &[u8], secret: &str) -> ApiResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ApiError::internal_error("Failed to initialize HMAC"))?;
    mac.update(payload);
    Ok(format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes())))
}

/// Verifies and applies change notifications.
pub struct IngestHandler {
    engine: ApiEngine,
    secret: SecretString,
    metrics: Arc<CoherenceMetrics>,
}

impl IngestHandler {
    pub fn new(engine: ApiEngine, secret: SecretString, metrics: Arc<CoherenceMetrics>) -> Self {
        Self { engine, secret, metrics }
    }

    /// Check `signature` against the body in constant time.
    pub fn verify(&self, signature: Option<&str>, body: &[u8]) -> ApiResult<()> {
        let signature = signature.ok_or_else(|| ApiError::unauthorized("Missing notification signature"))?;
        let signature_hex = signature
            .strip_prefix(SIGNATURE_PREFIX)
            .ok_or_else(|| ApiError::unauthorized("Unsupported signature scheme"))?;
        let expected =
            hex::decode(signature_hex).map_err(|_| ApiError::unauthorized("Invalid signature encoding"))?;

        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| ApiError::internal_error("Failed to initialize HMAC"))?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| ApiError::unauthorized("Invalid notification signature"))
    }

    /// Verify, decode and apply one notification.
    pub async fn handle(&self, signature: Option<&str>, body: &[u8]) -> ApiResult<IngestAck> {
        if let Err(e) = self.verify(signature, body) {
            tracing::warn!(error = %e, "Rejected change notification");
            self.metrics.record_notification(None, false);
            return Err(e);
        }

        let notification: ChangeNotification = match serde_json::from_slice(body) {
            Ok(n) => n,
            Err(e) => {
                self.metrics.record_notification(None, false);
                return Err(ApiError::invalid_input(format!("Invalid notification payload: {}", e)));
            }
        };

        let intended = if notification.deleted {
            NotificationAction::Deleted
        } else {
            NotificationAction::Upserted
        };

        match self.engine.apply_notification(&notification).await {
            Ok(action) => {
                self.metrics.record_notification(Some(action), true);
                tracing::debug!(
                    entity_type = %notification.entity_type,
                    record_id = %notification.record_id,
                    action = action.as_str(),
                    sent_at = %notification.timestamp,
                    "Change notification applied"
                );
                Ok(IngestAck {
                    entity_type: notification.entity_type,
                    record_id: notification.record_id,
                    action: action.as_str().to_string(),
                    applied_at: self.engine.clock().now(),
                })
            }
            Err(e) => {
                self.metrics.record_notification(Some(intended), false);
                tracing::warn!(
                    entity_type = %notification.entity_type,
                    record_id = %notification.record_id,
                    error = %e,
                    "Failed to apply change notification"
                );
                Err(e.into())
            }
        }
    }
}

/// POST /v1/changes
pub async fn ingest_change(
    State(handler): State<Arc<IngestHandler>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<IngestAck>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok());
    handler.handle(signature, &body).await.map(Json)
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/changes", post(ingest_change))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coherence_core::{EngineConfig, EntitySchema, SchemaRegistry};
    use coherence_storage::{CacheStore, InMemoryCacheStore, MockRecordStore, RecordStore};
    use serde_json::json;

    const SECRET: &str = "test-secret-0123456789";

    fn handler() -> (IngestHandler, ApiEngine) {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let records: Arc<dyn RecordStore> = Arc::new(MockRecordStore::new());
        let schemas = SchemaRegistry::new().with(EntitySchema::new("post").indexed("slug"));
        let engine = ApiEngine::new(store, records, schemas, EngineConfig::default()).expect("engine");
        let metrics = Arc::new(CoherenceMetrics::new().expect("metrics"));
        let handler = IngestHandler::new(engine.clone(), SecretString::new(SECRET.into()), metrics);
        (handler, engine)
    }

    fn body(v: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&v).expect("encode")
    }

    #[test]
    fn test_sign_payload_format() {
        let signature = sign_payload(b"{}", SECRET).expect("sign");
        let hex_part = signature.strip_prefix("sha256=").expect("prefix");
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_signatures() {
        let (handler, _) = handler();
        let payload = b"{\"a\":1}";
        let good = sign_payload(payload, SECRET).expect("sign");

        assert!(handler.verify(Some(&good), payload).is_ok());
        assert!(handler.verify(None, payload).is_err());
        assert!(handler.verify(Some("md5=abcd"), payload).is_err());
        assert!(handler.verify(Some("sha256=zz"), payload).is_err());
        assert!(handler.verify(Some(&good), b"{\"a\":2}").is_err());

        let forged = sign_payload(payload, "another-secret-value").expect("sign");
        assert!(handler.verify(Some(&forged), payload).is_err());
    }

    #[tokio::test]
    async fn test_handle_applies_upsert_and_delete() {
        let (handler, engine) = handler();
        let post = EntityType::from("post");

        let upsert = body(json!({
            "entity_type": "post",
            "record_id": "p1",
            "fields": {"slug": "hello"},
            "timestamp": "2026-01-01T00:00:00Z"
        }));
        let ack = handler
            .handle(Some(&sign_payload(&upsert, SECRET).expect("sign")), &upsert)
            .await
            .expect("ack");
        assert_eq!(ack.action, "upserted");
        assert_eq!(ack.record_id, "p1");
        assert!(engine.indexes().index_lookup(&post, "slug", "hello").expect("lookup").contains("p1"));

        let deletion = body(json!({
            "entity_type": "post",
            "record_id": "p1",
            "timestamp": "2026-01-01T00:00:01Z",
            "deleted": true
        }));
        let ack = handler
            .handle(Some(&sign_payload(&deletion, SECRET).expect("sign")), &deletion)
            .await
            .expect("ack");
        assert_eq!(ack.action, "deleted");
        assert!(engine.store().has_tombstone(&post, "p1").await.expect("has"));
    }

    #[tokio::test]
    async fn test_handle_rejects_bad_payloads() {
        let (handler, _) = handler();

        let garbage = b"not json".to_vec();
        let err = handler
            .handle(Some(&sign_payload(&garbage, SECRET).expect("sign")), &garbage)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);

        let unknown = body(json!({
            "entity_type": "ghost",
            "record_id": "g1",
            "fields": {},
            "timestamp": "2026-01-01T00:00:00Z"
        }));
        let err = handler
            .handle(Some(&sign_payload(&unknown, SECRET).expect("sign")), &unknown)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }
}
