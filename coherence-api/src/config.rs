//! API Configuration Module
//!
//! Server, ingestion, upstream and cache-backend settings loaded from
//! environment variables. Engine tuning (TTLs, sweep cadence) is read by
//! [`EngineConfig::from_env`].

use std::net::SocketAddr;
use std::path::PathBuf;

use coherence_core::{ConfigError, EngineConfig};
use secrecy::{ExposeSecret, SecretString};

const DEFAULT_BIND_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SCHEMA_PATH: &str = "coherence-schema.toml";
const DEFAULT_LMDB_MAX_SIZE_MB: usize = 1024;

/// Which cache store backs the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendConfig {
    /// Process-local map; lost on restart.
    Memory,
    /// LMDB environment at `path`.
    Lmdb { path: PathBuf, max_size_mb: usize },
}

/// API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,

    /// Shared secret for change-notification signatures.
    pub webhook_secret: Option<SecretString>,

    /// Base URL of the source of record's REST API.
    pub upstream_base_url: Option<String>,

    /// Bearer token for the source of record.
    pub upstream_token: Option<SecretString>,

    /// TOML file declaring entity schemas.
    pub schema_path: PathBuf,

    pub cache_backend: CacheBackendConfig,

    pub engine: EngineConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            webhook_secret: None,
            upstream_base_url: None,
            upstream_token: None,
            schema_path: PathBuf::from(DEFAULT_SCHEMA_PATH),
            cache_backend: CacheBackendConfig::Memory,
            engine: EngineConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `COHERENCE_API_BIND`: Bind host (default: 0.0.0.0)
    /// - `PORT` or `COHERENCE_API_PORT`: Bind port (default: 3000)
    /// - `COHERENCE_WEBHOOK_SECRET`: Notification signing secret (required)
    /// - `COHERENCE_UPSTREAM_URL`: Source-of-record base URL (required)
    /// - `COHERENCE_UPSTREAM_TOKEN`: Source-of-record bearer token
    /// - `COHERENCE_SCHEMA_PATH`: Schema file (default: coherence-schema.toml)
    /// - `COHERENCE_LMDB_PATH`: LMDB directory; unset selects the in-memory store
    /// - `COHERENCE_LMDB_MAX_SIZE_MB`: LMDB map size (default: 1024)
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("COHERENCE_API_BIND").unwrap_or_else(|_| DEFAULT_BIND_HOST.to_string());
        let port = std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("COHERENCE_API_PORT").ok())
            .unwrap_or_else(|| DEFAULT_PORT.to_string());
        let bind_addr = resolve_bind_addr(&host, &port)?;

        let webhook_secret = std::env::var("COHERENCE_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| SecretString::new(s.into()));

        let upstream_base_url = std::env::var("COHERENCE_UPSTREAM_URL")
            .ok()
            .map(|s| s.trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());

        let upstream_token = std::env::var("COHERENCE_UPSTREAM_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| SecretString::new(s.into()));

        let schema_path = std::env::var("COHERENCE_SCHEMA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SCHEMA_PATH));

        let cache_backend = match std::env::var("COHERENCE_LMDB_PATH") {
            Ok(path) if !path.is_empty() => CacheBackendConfig::Lmdb {
                path: PathBuf::from(path),
                max_size_mb: std::env::var("COHERENCE_LMDB_MAX_SIZE_MB")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_LMDB_MAX_SIZE_MB),
            },
            _ => CacheBackendConfig::Memory,
        };

        Ok(Self {
            bind_addr,
            webhook_secret,
            upstream_base_url,
            upstream_token,
            schema_path,
            cache_backend,
            engine: EngineConfig::from_env(),
        })
    }

    /// Check that everything the server needs at startup is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.webhook_secret {
            None => {
                return Err(ConfigError::MissingRequired {
                    field: "COHERENCE_WEBHOOK_SECRET".to_string(),
                })
            }
            Some(secret) if secret.expose_secret().len() < 16 => {
                return Err(ConfigError::InvalidValue {
                    field: "COHERENCE_WEBHOOK_SECRET".to_string(),
                    value: "<redacted>".to_string(),
                    reason: "must be at least 16 bytes".to_string(),
                })
            }
            Some(_) => {}
        }

        let Some(url) = &self.upstream_base_url else {
            return Err(ConfigError::MissingRequired {
                field: "COHERENCE_UPSTREAM_URL".to_string(),
            });
        };
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "COHERENCE_UPSTREAM_URL".to_string(),
                value: url.clone(),
                reason: "must be an http(s) URL".to_string(),
            });
        }

        if let CacheBackendConfig::Lmdb { max_size_mb, .. } = &self.cache_backend {
            if *max_size_mb == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "COHERENCE_LMDB_MAX_SIZE_MB".to_string(),
                    value: "0".to_string(),
                    reason: "must be greater than 0".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn resolve_bind_addr(host: &str, port: &str) -> Result<SocketAddr, ConfigError> {
    let port = port.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
        field: "PORT".to_string(),
        value: port.to_string(),
        reason: "must be a TCP port number".to_string(),
    })?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>().map_err(|e| ConfigError::InvalidValue {
        field: "COHERENCE_API_BIND".to_string(),
        value: addr.clone(),
        reason: e.to_string(),
    })
}
