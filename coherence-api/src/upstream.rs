//! REST client for the source of record.
//!
//! Routes, relative to the configured base URL:
//! - `GET {type}/{id}`: the record's fields, 404 when absent
//! - `HEAD {type}/{id}`: existence
//! - `GET {type}?{field}={value}`: `[{id, fields}]`
//! - `PUT {type}/{id}`: upsert, echoes the stored fields
//! - `DELETE {type}/{id}`: 404 counts as already deleted
//!
//! 429, 5xx and transport failures are reported as `Unavailable`; the
//! engine applies its own timeout on top of the client's.

use async_trait::async_trait;
use coherence_core::{EntityId, EntityType, Fields, UpstreamError};
use coherence_storage::RecordStore;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

const USER_AGENT: &str = concat!("coherence/", env!("CARGO_PKG_VERSION"));

/// One row of a by-field query.
#[derive(Debug, Deserialize)]
struct FieldMatch {
    id: EntityId,
    #[serde(default)]
    fields: Fields,
}

/// HTTP-backed [`RecordStore`].
#[derive(Clone)]
pub struct HttpRecordStore {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpRecordStore {
    pub fn new(base_url: impl Into<String>, token: Option<SecretString>) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| UpstreamError::Unavailable {
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self::with_client(client, base_url, token))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, token: Option<SecretString>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url, token }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, entity_type: &EntityType) -> String {
        format!("{}/{}", self.base_url, entity_type)
    }

    fn record_url(&self, entity_type: &EntityType, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, entity_type, urlencoding::encode(id))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, UpstreamError> {
        let response = self.authorize(request).send().await.map_err(transport_error)?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(UpstreamError::Unavailable {
                reason: format!("record store responded {}", status),
            });
        }
        Ok(response)
    }
}

fn transport_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Unavailable {
            reason: err.to_string(),
        }
    }
}

fn unexpected(status: StatusCode) -> UpstreamError {
    UpstreamError::Unavailable {
        reason: format!("unexpected record store status {}", status),
    }
}

fn decode_error(err: reqwest::Error) -> UpstreamError {
    UpstreamError::Unavailable {
        reason: format!("invalid record store response: {}", err),
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn fetch(&self, entity_type: &EntityType, id: &str) -> Result<Option<Fields>, UpstreamError> {
        let response = self.send(self.client.get(self.record_url(entity_type, id))).await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(None),
            s if s.is_success() => response.json::<Fields>().await.map(Some).map_err(decode_error),
            s => Err(unexpected(s)),
        }
    }

    async fn fetch_by_field(
        &self,
        entity_type: &EntityType,
        field: &str,
        value: &str,
    ) -> Result<Vec<(EntityId, Fields)>, UpstreamError> {
        let request = self
            .client
            .get(self.collection_url(entity_type))
            .query(&[(field, value)]);
        let response = self.send(request).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            s if s.is_success() => {
                let rows: Vec<FieldMatch> = response.json().await.map_err(decode_error)?;
                Ok(rows.into_iter().map(|row| (row.id, row.fields)).collect())
            }
            s => Err(unexpected(s)),
        }
    }

    async fn exists(&self, entity_type: &EntityType, id: &str) -> Result<bool, UpstreamError> {
        let response = self.send(self.client.head(self.record_url(entity_type, id))).await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(unexpected(s)),
        }
    }

    async fn delete(&self, entity_type: &EntityType, id: &str) -> Result<(), UpstreamError> {
        let response = self.send(self.client.delete(self.record_url(entity_type, id))).await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(()),
            s if s.is_success() => Ok(()),
            s => Err(unexpected(s)),
        }
    }

    async fn upsert(&self, entity_type: &EntityType, id: &str, fields: Fields) -> Result<Fields, UpstreamError> {
        let request = self.client.put(self.record_url(entity_type, id)).json(&fields);
        let response = self.send(request).await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(fields),
            s if s.is_success() => response.json::<Fields>().await.map_err(decode_error),
            s => Err(unexpected(s)),
        }
    }
}
