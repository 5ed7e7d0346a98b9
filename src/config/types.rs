//! Raw config types matching the entity model JSON (`config/entities.json`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whole model document: one PostgreSQL schema, many entities.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub entities: Vec<EntityConfig>,
}

fn default_schema() -> String {
    "public".into()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnTypeConfig {
    Simple(String),
    Parameterized { name: String, params: Option<Vec<u32>> },
}

impl ColumnTypeConfig {
    pub fn base_name(&self) -> &str {
        match self {
            ColumnTypeConfig::Simple(s) => s.as_str(),
            ColumnTypeConfig::Parameterized { name, .. } => name.as_str(),
        }
    }

    /// Declared length of a `varchar`/`char` column.
    pub fn char_limit(&self) -> Option<usize> {
        let ColumnTypeConfig::Parameterized { name, params } = self else {
            return None;
        };
        match name.to_lowercase().as_str() {
            "varchar" | "character varying" | "char" | "character" => {
                params.as_ref().and_then(|p| p.first()).map(|n| *n as usize)
            }
            _ => None,
        }
    }

    /// Type as written in DDL, e.g. `varchar(200)`.
    pub fn ddl(&self) -> String {
        match self {
            ColumnTypeConfig::Simple(s) => s.clone(),
            ColumnTypeConfig::Parameterized { name, params } => {
                let p = params
                    .as_ref()
                    .map(|v| v.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", "))
                    .unwrap_or_default();
                if p.is_empty() {
                    name.clone()
                } else {
                    format!("{}({})", name, p)
                }
            }
        }
    }
}

/// Foreign lookup: this column holds a key of another entity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// Path segment of the referenced entity.
    pub entity: String,
    /// Referenced column; defaults to the target's primary key.
    #[serde(default)]
    pub column: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ColumnTypeConfig,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub references: Option<ReferenceConfig>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

/// `?param=value` compared for equality against `column` (defaults to `param`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExactFilterConfig {
    pub param: String,
    #[serde(default)]
    pub column: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeBound {
    /// column >= value
    Min,
    /// column <= value
    Max,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangeFilterConfig {
    pub param: String,
    pub column: String,
    pub bound: RangeBound,
}

/// Equality on a column of the entity referenced through `via`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinedFilterConfig {
    pub param: String,
    /// Reference column on this entity.
    pub via: String,
    /// Column on the referenced entity.
    pub column: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FilterSetConfig {
    #[serde(default)]
    pub exact: Vec<ExactFilterConfig>,
    #[serde(default)]
    pub range: Vec<RangeFilterConfig>,
    #[serde(default)]
    pub joined: Vec<JoinedFilterConfig>,
}

/// Who may create, update and delete rows of an entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// Any caller, authenticated or not.
    #[default]
    Open,
    /// Authenticated callers; update/delete only by the row's owner.
    Owner,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityConfig {
    pub path_segment: String,
    pub table: String,
    #[serde(default = "default_pk")]
    pub primary_key: String,
    pub columns: Vec<ColumnConfig>,
    pub operations: Vec<String>,
    #[serde(default)]
    pub filters: FilterSetConfig,
    /// Columns matched by `?search=` (case-insensitive prefix).
    #[serde(default)]
    pub search: Vec<String>,
    /// Columns accepted by `?ordering=`.
    #[serde(default)]
    pub ordering: Vec<String>,
    #[serde(default)]
    pub write_policy: WritePolicy,
    /// Required when `write_policy` is `owner`.
    #[serde(default)]
    pub owner_column: Option<String>,
    #[serde(default)]
    pub throttle_scope: Option<String>,
    #[serde(default)]
    pub validation: HashMap<String, ValidationRule>,
}

fn default_pk() -> String {
    "id".into()
}
