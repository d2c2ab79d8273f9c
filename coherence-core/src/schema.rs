//! Static entity schema declarations.
//!
//! Each cached entity type declares which fields are indexed, which fields
//! hold references to other entity types, and how the sweep should treat it.
//! Declarations are built in code or parsed from TOML:
//!
//! ```toml
//! [[entity]]
//! name = "post"
//! reachability = "referenced"
//! indexed = ["slug", "author_id"]
//!
//! [[entity.references]]
//! field = "author_id"
//! target = "author"
//! ```

use crate::error::ConfigError;
use crate::{EntityId, EntityType, Fields};
use serde::{Deserialize, Serialize};

/// Longest entity type name, in bytes, that a cache key can carry.
pub const MAX_ENTITY_TYPE_LEN: usize = u16::MAX as usize;
use std::collections::BTreeMap;
use std::time::Duration;

/// How the sweep decides whether a cached entity might be orphaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    /// Not expected to be referenced; only rechecked by age.
    #[default]
    TopLevel,
    /// Only reachable through references from other cached entities.
    Referenced,
}

/// A field holding the id (or ids) of another entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceField {
    pub field: String,
    pub target: EntityType,
}

/// Declaration of one cached entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    pub entity_type: EntityType,
    pub indexed_fields: Vec<String>,
    pub references: Vec<ReferenceField>,
    pub reachability: Reachability,
    /// Age after which a top-level record is rechecked by the sweep.
    pub recheck_after: Option<Duration>,
    /// Query the source of record when an indexed lookup resolves nothing.
    pub field_fallback: bool,
}

impl EntitySchema {
    pub fn new(entity_type: impl Into<EntityType>) -> Self {
        Self {
            entity_type: entity_type.into(),
            indexed_fields: Vec::new(),
            references: Vec::new(),
            reachability: Reachability::TopLevel,
            recheck_after: None,
            field_fallback: true,
        }
    }

    pub fn indexed(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.indexed_fields.contains(&field) {
            self.indexed_fields.push(field);
        }
        self
    }

    /// Declare a reference field. Does not change reachability of either side.
    pub fn reference(mut self, field: impl Into<String>, target: impl Into<EntityType>) -> Self {
        self.references.push(ReferenceField {
            field: field.into(),
            target: target.into(),
        });
        self
    }

    pub fn referenced_only(mut self) -> Self {
        self.reachability = Reachability::Referenced;
        self
    }

    pub fn recheck_after(mut self, age: Duration) -> Self {
        self.recheck_after = Some(age);
        self
    }

    pub fn without_field_fallback(mut self) -> Self {
        self.field_fallback = false;
        self
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.indexed_fields.iter().any(|f| f == field)
    }

    /// Referenced ids found in `fields`, paired with their target type.
    ///
    /// A reference field may hold one id string or an array of id strings;
    /// anything else is ignored.
    pub fn reference_ids<'a>(&'a self, fields: &'a Fields) -> impl Iterator<Item = (&'a EntityType, EntityId)> + 'a {
        self.references.iter().flat_map(move |r| {
            let ids: Vec<EntityId> = match fields.get(&r.field) {
                Some(serde_json::Value::String(id)) => vec![id.clone()],
                Some(serde_json::Value::Array(items)) => items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            };
            ids.into_iter().map(move |id| (&r.target, id))
        })
    }
}

/// All declared entity types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    schemas: BTreeMap<EntityType, EntitySchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a declaration.
    pub fn register(&mut self, schema: EntitySchema) -> &mut Self {
        self.schemas.insert(schema.entity_type.clone(), schema);
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, schema: EntitySchema) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, entity_type: &EntityType) -> Option<&EntitySchema> {
        self.schemas.get(entity_type)
    }

    /// Look up a declaration, failing for undeclared types.
    pub fn require(&self, entity_type: &EntityType) -> Result<&EntitySchema, ConfigError> {
        self.schemas
            .get(entity_type)
            .ok_or_else(|| ConfigError::UnknownEntityType {
                entity_type: entity_type.clone(),
            })
    }

    pub fn contains(&self, entity_type: &EntityType) -> bool {
        self.schemas.contains_key(entity_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntitySchema> {
        self.schemas.values()
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.schemas.keys()
    }

    /// Every declared (entity type, indexed field) pair.
    pub fn indexes(&self) -> impl Iterator<Item = (&EntityType, &str)> {
        self.schemas
            .values()
            .flat_map(|s| s.indexed_fields.iter().map(move |f| (&s.entity_type, f.as_str())))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Check cross-declaration rules.
    ///
    /// Validates:
    /// - every reference target is a declared entity type
    /// - indexed and reference field names are non-empty
    /// - `recheck_after` is positive when set
    pub fn validate(&self) -> Result<(), ConfigError> {
        for schema in self.schemas.values() {
            let name = schema.entity_type.as_str();
            if name.trim().is_empty() || name.len() > MAX_ENTITY_TYPE_LEN {
                return Err(ConfigError::InvalidValue {
                    field: "entity.name".to_string(),
                    value: name.chars().take(64).collect(),
                    reason: format!("entity type names must be 1..={} bytes", MAX_ENTITY_TYPE_LEN),
                });
            }

            for field in &schema.indexed_fields {
                if field.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: format!("{}.indexed", schema.entity_type),
                        value: field.clone(),
                        reason: "indexed field names must be non-empty".to_string(),
                    });
                }
            }

            for reference in &schema.references {
                if reference.field.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: format!("{}.references", schema.entity_type),
                        value: reference.field.clone(),
                        reason: "reference field names must be non-empty".to_string(),
                    });
                }
                if !self.contains(&reference.target) {
                    return Err(ConfigError::UnknownEntityType {
                        entity_type: reference.target.clone(),
                    });
                }
            }

            if schema.recheck_after == Some(Duration::ZERO) {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}.recheck_after_secs", schema.entity_type),
                    value: "0".to_string(),
                    reason: "recheck_after must be positive".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Parse and validate a TOML schema document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let file: SchemaFile = toml::from_str(input).map_err(|e| ConfigError::SchemaParse {
            reason: e.to_string(),
        })?;

        let mut registry = SchemaRegistry::new();
        for def in file.entity {
            let entity_type = EntityType::from(def.name);
            if registry.contains(&entity_type) {
                return Err(ConfigError::SchemaParse {
                    reason: format!("entity type {} declared twice", entity_type),
                });
            }
            registry.register(EntitySchema {
                entity_type,
                indexed_fields: def.indexed,
                references: def.references,
                reachability: def.reachability,
                recheck_after: def.recheck_after_secs.map(Duration::from_secs),
                field_fallback: def.field_fallback,
            });
        }

        registry.validate()?;
        Ok(registry)
    }
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    entity: Vec<EntityDef>,
}

#[derive(Debug, Deserialize)]
struct EntityDef {
    name: String,
    #[serde(default)]
    indexed: Vec<String>,
    #[serde(default)]
    references: Vec<ReferenceField>,
    #[serde(default)]
    reachability: Reachability,
    #[serde(default)]
    recheck_after_secs: Option<u64>,
    #[serde(default = "default_field_fallback")]
    field_fallback: bool,
}

fn default_field_fallback() -> bool {
    true
}
