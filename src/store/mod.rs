//! Entity persistence. Handlers talk to an [`EntityStore`]; PostgreSQL in production,
//! an in-process store for `STORE=memory` and tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{connect, ensure_database_exists, PgStore};

use crate::config::ResolvedEntity;
use crate::error::AppError;
use crate::filter::{ListQuery, Predicate};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// A row that must exist before a create can reference it: `column = value` in `entity`.
#[derive(Clone, Copy, Debug)]
pub struct EnsureRow<'a> {
    pub entity: &'a ResolvedEntity,
    pub column: &'a str,
    pub value: &'a Value,
}

/// Row-level operations over one resolved entity. Rows are JSON objects keyed by column name.
///
/// Write failures map to `Conflict` for unique violations and for deleting a row that is
/// still referenced; a write naming a missing referenced row is a `Validation` error.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// One page of rows matching `query`, in its order.
    async fn query(&self, entity: &ResolvedEntity, query: &ListQuery) -> Result<Vec<Value>, AppError>;

    /// Number of rows matching `predicate`.
    async fn count(&self, entity: &ResolvedEntity, predicate: &Predicate) -> Result<u64, AppError>;

    async fn find_by(&self, entity: &ResolvedEntity, column: &str, value: &Value) -> Result<Option<Value>, AppError>;

    async fn get(&self, entity: &ResolvedEntity, id: i64) -> Result<Option<Value>, AppError> {
        self.find_by(entity, &entity.pk_column, &Value::from(id)).await
    }

    /// Insert a row; the key is assigned by the store.
    async fn create(&self, entity: &ResolvedEntity, fields: &HashMap<String, Value>) -> Result<Value, AppError> {
        self.create_with(entity, fields, &[]).await
    }

    /// Insert a row after creating any missing `ensure` rows, all or nothing.
    async fn create_with(
        &self,
        entity: &ResolvedEntity,
        fields: &HashMap<String, Value>,
        ensure: &[EnsureRow<'_>],
    ) -> Result<Value, AppError>;

    /// Apply `fields` to row `id`. `None` when the row does not exist.
    async fn update(
        &self,
        entity: &ResolvedEntity,
        id: i64,
        fields: &HashMap<String, Value>,
    ) -> Result<Option<Value>, AppError>;

    /// `false` when the row does not exist.
    async fn delete(&self, entity: &ResolvedEntity, id: i64) -> Result<bool, AppError>;

    /// Readiness probe.
    async fn ping(&self) -> Result<(), AppError>;
}
