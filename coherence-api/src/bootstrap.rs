//! Startup wiring: schema loading and engine construction.

use std::path::Path;
use std::sync::Arc;

use coherence_core::{CoherenceError, ConfigError, SchemaRegistry};
use coherence_storage::{CacheStore, InMemoryCacheStore, LmdbCacheStore, RecordStore};

use crate::config::{ApiConfig, CacheBackendConfig};
use crate::error::{ApiError, ApiResult};
use crate::state::ApiEngine;
use crate::upstream::HttpRecordStore;

/// Read and validate the entity schema file.
pub fn load_schemas(path: &Path) -> ApiResult<SchemaRegistry> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ApiError::internal_error(format!("Failed to read schema file {}: {}", path.display(), e))
    })?;
    let schemas = SchemaRegistry::from_toml_str(&raw).map_err(CoherenceError::from)?;
    Ok(schemas)
}

/// Open the configured cache store.
pub fn open_cache_store(backend: &CacheBackendConfig) -> ApiResult<Arc<dyn CacheStore>> {
    match backend {
        CacheBackendConfig::Memory => {
            tracing::warn!("Using in-memory cache store; contents are lost on restart");
            Ok(Arc::new(InMemoryCacheStore::new()))
        }
        CacheBackendConfig::Lmdb { path, max_size_mb } => {
            std::fs::create_dir_all(path).map_err(|e| {
                ApiError::internal_error(format!("Failed to create LMDB directory {}: {}", path.display(), e))
            })?;
            let store = LmdbCacheStore::new(path, *max_size_mb).map_err(CoherenceError::from)?;
            tracing::info!(path = %path.display(), max_size_mb, "Opened LMDB cache store");
            Ok(Arc::new(store))
        }
    }
}

/// Build the engine from configuration and rebuild its indexes from
/// whatever the cache store already holds.
pub async fn build_engine(config: &ApiConfig, schemas: SchemaRegistry) -> ApiResult<ApiEngine> {
    let base_url = config
        .upstream_base_url
        .clone()
        .ok_or_else(|| {
            CoherenceError::from(ConfigError::MissingRequired {
                field: "COHERENCE_UPSTREAM_URL".to_string(),
            })
        })?;
    let records: Arc<dyn RecordStore> = Arc::new(
        HttpRecordStore::new(base_url, config.upstream_token.clone())
            .map_err(|e| ApiError::internal_error(e.to_string()))?,
    );

    let store = open_cache_store(&config.cache_backend)?;
    let engine = ApiEngine::new(store, records, schemas, config.engine.clone())?;

    let indexed = engine.rebuild_indexes().await?;
    tracing::info!(
        entity_types = engine.schemas().len(),
        indexed_records = indexed,
        "Cache engine ready"
    );
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_schemas_from_file() -> Result<(), String> {
        let mut file = tempfile::NamedTempFile::new().map_err(|e| e.to_string())?;
        writeln!(
            file,
            r#"
[[entity]]
name = "author"

[[entity]]
name = "post"
indexed = ["slug"]
reachability = "referenced"
references = [{{ field = "author_id", target = "author" }}]
"#
        )
        .map_err(|e| e.to_string())?;

        let schemas = load_schemas(file.path()).map_err(|e| e.message)?;
        assert_eq!(schemas.len(), 2);
        Ok(())
    }

    #[test]
    fn test_load_schemas_missing_file() {
        let err = load_schemas(Path::new("/nonexistent/coherence-schema.toml")).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InternalError);
    }

    #[test]
    fn test_open_lmdb_store() -> Result<(), String> {
        let dir = tempfile::TempDir::new().map_err(|e| e.to_string())?;
        let backend = CacheBackendConfig::Lmdb {
            path: dir.path().join("cache"),
            max_size_mb: 16,
        };
        open_cache_store(&backend).map_err(|e| e.message)?;
        Ok(())
    }
}
