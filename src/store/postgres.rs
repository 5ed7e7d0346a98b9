//! PostgreSQL-backed store executing the statements from [`crate::sql`].

use super::{EnsureRow, EntityStore};
use crate::config::ResolvedEntity;
use crate::error::AppError;
use crate::filter::{ListQuery, Predicate};
use crate::sql::{self, PgBindValue, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgDatabaseError, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{ConnectOptions, PgPool, Postgres};
use std::collections::HashMap;
use std::str::FromStr;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const NOT_NULL_VIOLATION: &str = "23502";
const STRING_TOO_LONG: &str = "22001";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_all(&self, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
        let rows = prepared(q).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn fetch_optional(&self, q: &QueryBuf) -> Result<Option<Value>, sqlx::Error> {
        let row = prepared(q).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| row_to_json(&r)))
    }
}

fn prepared(q: &QueryBuf) -> Query<'_, Postgres, PgArguments> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from_json(p));
    }
    query
}

#[async_trait]
impl EntityStore for PgStore {
    async fn query(&self, entity: &ResolvedEntity, query: &ListQuery) -> Result<Vec<Value>, AppError> {
        self.fetch_all(&sql::select_list(entity, query)).await
    }

    async fn count(&self, entity: &ResolvedEntity, predicate: &Predicate) -> Result<u64, AppError> {
        let q = sql::count_list(entity, predicate);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let n = query.fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }

    async fn find_by(&self, entity: &ResolvedEntity, column: &str, value: &Value) -> Result<Option<Value>, AppError> {
        Ok(self.fetch_optional(&sql::select_by_column(entity, column, value)).await?)
    }

    async fn create_with(
        &self,
        entity: &ResolvedEntity,
        fields: &HashMap<String, Value>,
        ensure: &[EnsureRow<'_>],
    ) -> Result<Value, AppError> {
        let insert = sql::insert(entity, fields);
        if ensure.is_empty() {
            return self
                .fetch_optional(&insert)
                .await
                .map_err(|e| write_error(entity, e, false))?
                .ok_or(AppError::Db(sqlx::Error::RowNotFound));
        }
        // rolled back on drop if anything below fails
        let mut tx = self.pool.begin().await?;
        for r in ensure {
            let q = sql::insert_if_absent(r.entity, r.column, r.value);
            prepared(&q)
                .execute(&mut *tx)
                .await
                .map_err(|e| write_error(r.entity, e, false))?;
        }
        let row = prepared(&insert)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| write_error(entity, e, false))?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
        tx.commit().await?;
        Ok(row_to_json(&row))
    }

    async fn update(
        &self,
        entity: &ResolvedEntity,
        id: i64,
        fields: &HashMap<String, Value>,
    ) -> Result<Option<Value>, AppError> {
        self.fetch_optional(&sql::update(entity, id, fields))
            .await
            .map_err(|e| write_error(entity, e, false))
    }

    async fn delete(&self, entity: &ResolvedEntity, id: i64) -> Result<bool, AppError> {
        let row = self
            .fetch_optional(&sql::delete(entity, id))
            .await
            .map_err(|e| write_error(entity, e, true))?;
        Ok(row.is_some())
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Constraint violations become client errors; everything else stays a database error.
fn write_error(entity: &ResolvedEntity, e: sqlx::Error, deleting: bool) -> AppError {
    let sqlx::Error::Database(db) = &e else {
        return AppError::Db(e);
    };
    let classified = {
        let code = db.code();
        let violation = Violation {
            code: code.as_deref().unwrap_or(""),
            constraint: db.constraint().unwrap_or(""),
            column: db.try_downcast_ref::<PgDatabaseError>().and_then(|pg| pg.column()),
        };
        classify(entity, &violation, deleting)
    };
    classified.unwrap_or(AppError::Db(e))
}

/// The parts of a PostgreSQL error that decide how it is reported.
struct Violation<'a> {
    code: &'a str,
    constraint: &'a str,
    column: Option<&'a str>,
}

fn classify(entity: &ResolvedEntity, v: &Violation<'_>, deleting: bool) -> Option<AppError> {
    let err = match v.code {
        UNIQUE_VIOLATION => AppError::Conflict(format!(
            "{} with this value already exists ({})",
            entity.path_segment, v.constraint
        )),
        FOREIGN_KEY_VIOLATION if deleting => AppError::Conflict(format!(
            "{} is still referenced by other objects ({})",
            entity.path_segment, v.constraint
        )),
        FOREIGN_KEY_VIOLATION => AppError::validation(
            referencing_column(entity, v.constraint),
            "referenced object does not exist",
        ),
        NOT_NULL_VIOLATION => AppError::validation(
            v.column.unwrap_or("non_field_errors"),
            "this field may not be null",
        ),
        // Postgres does not name the column here
        STRING_TOO_LONG => AppError::validation(
            v.column.unwrap_or("non_field_errors"),
            "value is too long for this field",
        ),
        _ => return None,
    };
    Some(err)
}

/// Best guess at the body field behind a foreign-key constraint (`<table>_<column>_fkey`).
fn referencing_column(entity: &ResolvedEntity, constraint: &str) -> String {
    entity
        .columns
        .iter()
        .filter(|c| c.references.is_some())
        .find(|c| constraint.contains(&format!("_{}_", c.name)))
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "non_field_errors".into())
}

/// Open a pool against `database_url`.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Create the database named in `database_url` when missing, via the `postgres` maintenance database.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = split_database_name(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn split_database_name(url: &str) -> Result<(String, String), AppError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))?
        + 1;
    let db_name = url
        .get(path_start..)
        .unwrap_or("")
        .split('?')
        .next()
        .unwrap_or("")
        .trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

fn row_to_json(row: &PgRow) -> Value {
    use sqlx::{Column, Row};
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        map.insert(col.name().to_string(), cell_to_value(row, col.name()));
    }
    Value::Object(map)
}

/// Decode by trying the types the entity model can produce.
fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.and_utc().to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
