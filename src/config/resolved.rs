//! Resolved entity model: config validated and flattened for runtime use.

use crate::config::{RangeBound, ValidationRule, WritePolicy};
use serde_json::Value;
use std::collections::HashMap;

/// Logical value type of a column; drives query-string parsing and in-memory comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Float,
    Boolean,
    Timestamp,
    Text,
}

/// Resolved foreign lookup: where the referenced key lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnRef {
    pub entity: String,
    pub schema_name: String,
    pub table_name: String,
    pub column: String,
}

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ValueKind,
    pub nullable: bool,
    /// Whether the column has a DB default (serial, literal default).
    pub has_default: bool,
    /// PostgreSQL type name for SQL casts (e.g. "timestamptz") when binding values.
    pub pg_type: Option<String>,
    /// Type as written in CREATE TABLE.
    pub ddl_type: String,
    /// Character limit for `varchar(n)` columns.
    pub max_chars: Option<usize>,
    /// SQL default expression, as configured.
    pub default_sql: Option<String>,
    /// The default as a JSON value when it is a plain literal.
    pub default_value: Option<Value>,
    pub unique: bool,
    pub references: Option<ColumnRef>,
}

#[derive(Clone, Debug)]
pub struct ExactFilter {
    pub param: String,
    pub column: String,
    pub kind: ValueKind,
}

#[derive(Clone, Debug)]
pub struct RangeFilter {
    pub param: String,
    pub column: String,
    pub bound: RangeBound,
    pub kind: ValueKind,
}

#[derive(Clone, Debug)]
pub struct JoinedFilter {
    pub param: String,
    /// Reference column on the filtered entity.
    pub via: String,
    /// Referenced table and the key `via` points at.
    pub target: ColumnRef,
    /// Column on the referenced table compared for equality.
    pub column: String,
    pub kind: ValueKind,
}

#[derive(Clone, Debug, Default)]
pub struct FilterSet {
    pub exact: Vec<ExactFilter>,
    pub range: Vec<RangeFilter>,
    pub joined: Vec<JoinedFilter>,
}

#[derive(Clone, Debug)]
pub struct ResolvedEntity {
    pub schema_name: String,
    pub table_name: String,
    pub path_segment: String,
    pub pk_column: String,
    pub columns: Vec<ColumnInfo>,
    pub operations: Vec<String>,
    pub filters: FilterSet,
    pub search_fields: Vec<String>,
    pub ordering: Vec<String>,
    pub write_policy: WritePolicy,
    pub owner_column: Option<String>,
    pub throttle_scope: Option<String>,
    pub validation: HashMap<String, ValidationRule>,
}

impl ResolvedEntity {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn allows(&self, operation: &str) -> bool {
        self.operations.iter().any(|o| o == operation)
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedModel {
    pub entities: Vec<ResolvedEntity>,
    pub entity_by_path: HashMap<String, ResolvedEntity>,
}

impl ResolvedModel {
    pub fn entity_by_path(&self, path: &str) -> Option<&ResolvedEntity> {
        self.entity_by_path.get(path)
    }

    /// Entities whose columns reference `target` (path segment), with the referencing column.
    pub fn referrers<'a>(&'a self, target: &'a str) -> impl Iterator<Item = (&'a ResolvedEntity, &'a ColumnInfo)> + 'a {
        self.entities.iter().flat_map(move |e| {
            e.columns
                .iter()
                .filter(move |c| c.references.as_ref().map(|r| r.entity == target).unwrap_or(false))
                .map(move |c| (e, c))
        })
    }
}
