//! Load the entity model from JSON and resolve it for runtime use.

use crate::config::resolved::{
    ColumnInfo, ColumnRef, ExactFilter, FilterSet, JoinedFilter, RangeFilter, ResolvedEntity, ResolvedModel, ValueKind,
};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

const BUILTIN_MODEL: &str = include_str!("../../config/entities.json");

/// The games model shipped with the service.
pub fn builtin_config() -> Result<ModelConfig, ConfigError> {
    serde_json::from_str(BUILTIN_MODEL).map_err(|e| ConfigError::Load(format!("builtin model: {}", e)))
}

/// Read a model document from disk.
pub async fn load_from_path(path: &Path) -> Result<ModelConfig, ConfigError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

/// Build resolved model from config. Validates first.
pub fn resolve(config: &ModelConfig) -> Result<ResolvedModel, ConfigError> {
    validate(config)?;

    let by_path: HashMap<&str, &EntityConfig> =
        config.entities.iter().map(|e| (e.path_segment.as_str(), e)).collect();

    let mut entities = Vec::new();
    let mut entity_by_path = HashMap::new();

    for e in &config.entities {
        let columns: Vec<ColumnInfo> = e
            .columns
            .iter()
            .map(|c| {
                let base = c.type_.base_name().to_lowercase();
                ColumnInfo {
                    name: c.name.clone(),
                    kind: value_kind(&base),
                    nullable: c.nullable,
                    has_default: c.default.is_some() || base.contains("serial"),
                    pg_type: cast_type(&base),
                    ddl_type: c.type_.ddl(),
                    max_chars: c.type_.char_limit(),
                    default_sql: c.default.clone(),
                    default_value: c.default.as_deref().and_then(|d| literal_default(value_kind(&base), d)),
                    unique: c.unique,
                    references: c.references.as_ref().map(|r| column_ref(config, &by_path, r)),
                }
            })
            .collect();

        let kind_of = |name: &str| {
            columns
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.kind)
                .unwrap_or(ValueKind::Text)
        };

        let exact = e
            .filters
            .exact
            .iter()
            .map(|f| {
                let column = f.column.clone().unwrap_or_else(|| f.param.clone());
                ExactFilter {
                    param: f.param.clone(),
                    kind: kind_of(&column),
                    column,
                }
            })
            .collect();
        let range = e
            .filters
            .range
            .iter()
            .map(|f| RangeFilter {
                param: f.param.clone(),
                column: f.column.clone(),
                bound: f.bound,
                kind: kind_of(&f.column),
            })
            .collect();
        let mut joined = Vec::new();
        for f in &e.filters.joined {
            let target = columns
                .iter()
                .find(|c| c.name == f.via)
                .and_then(|c| c.references.clone())
                .ok_or_else(|| ConfigError::MissingReference {
                    kind: "reference",
                    id: format!("{}.{}", e.path_segment, f.via),
                })?;
            let target_entity = by_path.get(target.entity.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: target.entity.clone(),
            })?;
            let kind = target_entity
                .columns
                .iter()
                .find(|c| c.name == f.column)
                .map(|c| value_kind(&c.type_.base_name().to_lowercase()))
                .unwrap_or(ValueKind::Text);
            joined.push(JoinedFilter {
                param: f.param.clone(),
                via: f.via.clone(),
                target,
                column: f.column.clone(),
                kind,
            });
        }

        let entity = ResolvedEntity {
            schema_name: config.schema.clone(),
            table_name: e.table.clone(),
            path_segment: e.path_segment.clone(),
            pk_column: e.primary_key.clone(),
            columns,
            operations: e.operations.clone(),
            filters: FilterSet { exact, range, joined },
            search_fields: e.search.clone(),
            ordering: e.ordering.clone(),
            write_policy: e.write_policy,
            owner_column: e.owner_column.clone(),
            throttle_scope: e.throttle_scope.clone(),
            validation: e.validation.clone(),
        };
        entity_by_path.insert(e.path_segment.clone(), entity.clone());
        entities.push(entity);
    }

    Ok(ResolvedModel {
        entities,
        entity_by_path,
    })
}

fn column_ref(config: &ModelConfig, by_path: &HashMap<&str, &EntityConfig>, r: &ReferenceConfig) -> ColumnRef {
    // validate() has already checked that the target exists
    let target = by_path.get(r.entity.as_str());
    ColumnRef {
        entity: r.entity.clone(),
        schema_name: config.schema.clone(),
        table_name: target.map(|t| t.table.clone()).unwrap_or_default(),
        column: r
            .column
            .clone()
            .or_else(|| target.map(|t| t.primary_key.clone()))
            .unwrap_or_else(|| "id".into()),
    }
}

fn value_kind(base: &str) -> ValueKind {
    if base.starts_with("timestamp") || base == "date" {
        ValueKind::Timestamp
    } else if base.starts_with("bool") {
        ValueKind::Boolean
    } else if base.contains("int") || base.contains("serial") {
        ValueKind::Integer
    } else if base == "real" || base.starts_with("double") || base == "numeric" || base.starts_with("float") {
        ValueKind::Float
    } else {
        ValueKind::Text
    }
}

/// `'M'`, `false`, `0` as JSON; expressions such as `now()` have no literal value.
fn literal_default(kind: ValueKind, raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if let Some(quoted) = raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        return Some(Value::String(quoted.replace("''", "'")));
    }
    match kind {
        ValueKind::Boolean => raw.parse::<bool>().ok().map(Value::Bool),
        ValueKind::Integer => raw.parse::<i64>().ok().map(|n| Value::Number(n.into())),
        ValueKind::Float => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        ValueKind::Timestamp | ValueKind::Text => None,
    }
}

fn cast_type(base: &str) -> Option<String> {
    if base == "timestamptz" || base == "timestamp with time zone" {
        Some("timestamptz".into())
    } else if base == "timestamp" || base.starts_with("timestamp ") {
        Some("timestamp".into())
    } else if base == "date" {
        Some("date".into())
    } else if base == "bigint" || base == "bigserial" {
        Some("bigint".into())
    } else if base == "integer" || base == "int" || base == "serial" {
        Some("integer".into())
    } else if base.starts_with("bool") {
        Some("boolean".into())
    } else {
        None
    }
}
