//! In-process store: rows in ordered maps behind a lock, with the same constraint
//! behaviour as the PostgreSQL schema (unique columns, references, NOT NULL).

use super::{EnsureRow, EntityStore};
use crate::config::{ColumnInfo, ResolvedEntity, ResolvedModel, ValueKind};
use crate::error::AppError;
use crate::filter::{parse_timestamp, CompareOp, Direction, Field, FilterValue, ListQuery, Predicate};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

type Row = Map<String, Value>;

#[derive(Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, Row>,
}

impl Table {
    fn find(&self, column: &str, value: &Value) -> Option<&Row> {
        self.rows.values().find(|r| r.get(column).map(|v| same_value(v, value)).unwrap_or(false))
    }
}

pub struct MemoryStore {
    model: Arc<ResolvedModel>,
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new(model: Arc<ResolvedModel>) -> Self {
        let tables = model
            .entities
            .iter()
            .map(|e| (e.path_segment.clone(), Table::default()))
            .collect();
        MemoryStore {
            model,
            tables: RwLock::new(tables),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Table>> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Table>> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unique, NOT NULL and reference checks for a row about to be stored as `id`.
    fn check_row(&self, tables: &HashMap<String, Table>, entity: &ResolvedEntity, id: i64, row: &Row) -> Result<(), AppError> {
        let own = tables.get(&entity.path_segment);
        for c in entity.columns.iter().filter(|c| c.name != entity.pk_column) {
            let value = row.get(&c.name).unwrap_or(&Value::Null);
            if value.is_null() {
                if !c.nullable {
                    return Err(AppError::validation(&c.name, "this field may not be null"));
                }
                continue;
            }
            if c.unique {
                let taken = own
                    .map(|t| {
                        t.rows
                            .iter()
                            .any(|(k, r)| *k != id && r.get(&c.name).map(|v| same_value(v, value)).unwrap_or(false))
                    })
                    .unwrap_or(false);
                if taken {
                    return Err(AppError::Conflict(format!(
                        "{} with this {} already exists",
                        entity.path_segment, c.name
                    )));
                }
            }
            if let Some(r) = &c.references {
                let exists = tables.get(&r.entity).and_then(|t| t.find(&r.column, value)).is_some();
                if !exists {
                    return Err(AppError::validation(
                        &c.name,
                        format!("object with {}={} does not exist", r.column, value),
                    ));
                }
            }
        }
        Ok(())
    }

    fn matches(&self, tables: &HashMap<String, Table>, entity: &ResolvedEntity, row: &Row, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::Always => true,
            Predicate::And(parts) => parts.iter().all(|p| self.matches(tables, entity, row, p)),
            Predicate::Or(parts) => parts.iter().any(|p| self.matches(tables, entity, row, p)),
            Predicate::Compare { field, op, value } => match field {
                Field::Column(column) => row.get(column).map(|v| compare(v, *op, value)).unwrap_or(false),
                Field::Joined { via, target, column } => {
                    let Some(key) = row.get(via).filter(|v| !v.is_null()) else {
                        return false;
                    };
                    tables
                        .get(&target.entity)
                        .and_then(|t| t.find(&target.column, key))
                        .and_then(|related| related.get(column))
                        .map(|v| compare(v, *op, value))
                        .unwrap_or(false)
                }
            },
        }
    }

    fn filtered<'a>(
        &self,
        tables: &'a HashMap<String, Table>,
        entity: &ResolvedEntity,
        predicate: &Predicate,
    ) -> Vec<&'a Row> {
        tables
            .get(&entity.path_segment)
            .map(|t| {
                t.rows
                    .values()
                    .filter(|r| self.matches(tables, entity, r, predicate))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn remove_rows(tables: &mut HashMap<String, Table>, rows: &[(String, i64)]) {
        for (path, id) in rows {
            if let Some(t) = tables.get_mut(path) {
                t.rows.remove(id);
            }
        }
    }

    fn insert_row(tables: &mut HashMap<String, Table>, entity: &ResolvedEntity, mut row: Row) -> Row {
        let table = tables.entry(entity.path_segment.clone()).or_default();
        table.next_id += 1;
        let id = table.next_id;
        row.insert(entity.pk_column.clone(), Value::from(id));
        table.rows.insert(id, row.clone());
        row
    }
}

/// Row for a create: body values for known columns, literal defaults for the rest.
fn new_row(entity: &ResolvedEntity, fields: &HashMap<String, Value>) -> Row {
    let mut row = Row::new();
    for c in entity.columns.iter().filter(|c| c.name != entity.pk_column) {
        let value = match fields.get(&c.name) {
            Some(v) => normalize(c, v),
            None => c.default_value.clone().unwrap_or(Value::Null),
        };
        row.insert(c.name.clone(), value);
    }
    row
}

/// Store timestamps in the same RFC 3339 form PostgreSQL returns them in.
fn normalize(column: &ColumnInfo, value: &Value) -> Value {
    match (column.kind, value) {
        (ValueKind::Timestamp, Value::String(s)) => parse_timestamp(s)
            .map(|t| Value::String(t.to_rfc3339()))
            .unwrap_or_else(|| value.clone()),
        _ => value.clone(),
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(stored: &Value, op: CompareOp, operand: &FilterValue) -> bool {
    if op == CompareOp::StartsWith {
        let haystack = match stored {
            Value::String(s) => s.to_lowercase(),
            Value::Null => return false,
            other => other.to_string().to_lowercase(),
        };
        let needle = match operand {
            FilterValue::Text(s) => s.to_lowercase(),
            other => other.to_json().to_string().to_lowercase(),
        };
        return haystack.starts_with(&needle);
    }
    let ordering = match operand {
        FilterValue::Integer(n) => stored.as_f64().and_then(|v| v.partial_cmp(&(*n as f64))),
        FilterValue::Float(f) => stored.as_f64().and_then(|v| v.partial_cmp(f)),
        FilterValue::Boolean(b) => stored.as_bool().map(|v| v.cmp(b)),
        FilterValue::Timestamp(t) => stored.as_str().and_then(parse_timestamp).map(|v| v.cmp(t)),
        FilterValue::Text(s) => stored.as_str().map(|v| v.cmp(s.as_str())),
    };
    match (op, ordering) {
        (CompareOp::Eq, Some(o)) => o == Ordering::Equal,
        (CompareOp::Gte, Some(o)) => o != Ordering::Less,
        (CompareOp::Lte, Some(o)) => o != Ordering::Greater,
        _ => false,
    }
}

/// Order of two stored values of one column; NULLs last, as PostgreSQL sorts ascending.
fn order_values(kind: ValueKind, a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    match kind {
        ValueKind::Integer | ValueKind::Float => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        ValueKind::Boolean => a.as_bool().cmp(&b.as_bool()),
        ValueKind::Timestamp => a
            .as_str()
            .and_then(parse_timestamp)
            .cmp(&b.as_str().and_then(parse_timestamp)),
        ValueKind::Text => a.as_str().cmp(&b.as_str()),
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn query(&self, entity: &ResolvedEntity, query: &ListQuery) -> Result<Vec<Value>, AppError> {
        let tables = self.read();
        let mut rows = self.filtered(&tables, entity, &query.predicate);
        rows.sort_by(|a, b| {
            for key in &query.ordering {
                let kind = entity.column(&key.column).map(|c| c.kind).unwrap_or(ValueKind::Text);
                let null = Value::Null;
                let o = order_values(
                    kind,
                    a.get(&key.column).unwrap_or(&null),
                    b.get(&key.column).unwrap_or(&null),
                );
                let o = match key.direction {
                    Direction::Asc => o,
                    Direction::Desc => o.reverse(),
                };
                if o != Ordering::Equal {
                    return o;
                }
            }
            let pk = |r: &Row| r.get(&entity.pk_column).and_then(Value::as_i64);
            pk(a).cmp(&pk(b))
        });
        Ok(rows
            .into_iter()
            .skip(query.page.offset as usize)
            .take(query.page.limit as usize)
            .map(|r| Value::Object(r.clone()))
            .collect())
    }

    async fn count(&self, entity: &ResolvedEntity, predicate: &Predicate) -> Result<u64, AppError> {
        let tables = self.read();
        Ok(self.filtered(&tables, entity, predicate).len() as u64)
    }

    async fn find_by(&self, entity: &ResolvedEntity, column: &str, value: &Value) -> Result<Option<Value>, AppError> {
        let tables = self.read();
        Ok(tables
            .get(&entity.path_segment)
            .and_then(|t| t.find(column, value))
            .map(|r| Value::Object(r.clone())))
    }

    async fn create_with(
        &self,
        entity: &ResolvedEntity,
        fields: &HashMap<String, Value>,
        ensure: &[EnsureRow<'_>],
    ) -> Result<Value, AppError> {
        let row = new_row(entity, fields);
        let mut tables = self.write();
        let mut added = Vec::new();
        for r in ensure {
            if tables.get(&r.entity.path_segment).and_then(|t| t.find(r.column, r.value)).is_some() {
                continue;
            }
            let prerequisite = new_row(r.entity, &HashMap::from([(r.column.to_string(), r.value.clone())]));
            if let Err(e) = self.check_row(&tables, r.entity, 0, &prerequisite) {
                Self::remove_rows(&mut tables, &added);
                return Err(e);
            }
            let stored = Self::insert_row(&mut tables, r.entity, prerequisite);
            if let Some(id) = stored.get(&r.entity.pk_column).and_then(Value::as_i64) {
                added.push((r.entity.path_segment.clone(), id));
            }
        }
        if let Err(e) = self.check_row(&tables, entity, 0, &row) {
            Self::remove_rows(&mut tables, &added);
            return Err(e);
        }
        Ok(Value::Object(Self::insert_row(&mut tables, entity, row)))
    }

    async fn update(
        &self,
        entity: &ResolvedEntity,
        id: i64,
        fields: &HashMap<String, Value>,
    ) -> Result<Option<Value>, AppError> {
        let mut tables = self.write();
        let Some(mut row) = tables.get(&entity.path_segment).and_then(|t| t.rows.get(&id)).cloned() else {
            return Ok(None);
        };
        for c in entity.columns.iter().filter(|c| c.name != entity.pk_column) {
            if let Some(v) = fields.get(&c.name) {
                row.insert(c.name.clone(), normalize(c, v));
            }
        }
        self.check_row(&tables, entity, id, &row)?;
        if let Some(table) = tables.get_mut(&entity.path_segment) {
            table.rows.insert(id, row.clone());
        }
        Ok(Some(Value::Object(row)))
    }

    async fn delete(&self, entity: &ResolvedEntity, id: i64) -> Result<bool, AppError> {
        let mut tables = self.write();
        let Some(row) = tables.get(&entity.path_segment).and_then(|t| t.rows.get(&id)).cloned() else {
            return Ok(false);
        };
        for (referrer, column) in self.model.referrers(&entity.path_segment) {
            let Some(target) = column.references.as_ref() else { continue };
            let Some(key) = row.get(&target.column) else { continue };
            if tables
                .get(&referrer.path_segment)
                .and_then(|t| t.find(&column.name, key))
                .is_some()
            {
                return Err(AppError::Conflict(format!(
                    "{} is still referenced by {}",
                    entity.path_segment, referrer.path_segment
                )));
            }
        }
        if let Some(table) = tables.get_mut(&entity.path_segment) {
            table.rows.remove(&id);
        }
        Ok(true)
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin_config, resolve};
    use crate::filter::{build_list_query, Paging};
    use serde_json::json;

    fn store() -> (Arc<ResolvedModel>, MemoryStore) {
        let model = Arc::new(resolve(&builtin_config().unwrap()).unwrap());
        (model.clone(), MemoryStore::new(model))
    }

    fn fields(v: Value) -> HashMap<String, Value> {
        v.as_object().cloned().unwrap().into_iter().collect()
    }

    fn list(entity: &ResolvedEntity, pairs: &[(&str, &str)]) -> ListQuery {
        let params = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        build_list_query(entity, &params, Paging::default()).unwrap()
    }

    #[tokio::test]
    async fn create_assigns_ids_and_defaults() {
        let (model, store) = store();
        let players = model.entity_by_path("players").unwrap();
        let a = store.create(players, &fields(json!({ "name": "Ann" }))).await.unwrap();
        let b = store.create(players, &fields(json!({ "name": "Bo", "gender": "F" }))).await.unwrap();
        assert_eq!(a["id"], json!(1));
        assert_eq!(a["gender"], json!("M"));
        assert_eq!(b["id"], json!(2));
    }

    #[tokio::test]
    async fn unique_names_conflict() {
        let (model, store) = store();
        let categories = model.entity_by_path("game-categories").unwrap();
        store.create(categories, &fields(json!({ "name": "Puzzle" }))).await.unwrap();
        let err = store.create(categories, &fields(json!({ "name": "Puzzle" }))).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn references_must_exist_and_block_delete() {
        let (model, store) = store();
        let categories = model.entity_by_path("game-categories").unwrap();
        let users = model.entity_by_path("users").unwrap();
        let games = model.entity_by_path("games").unwrap();
        let game = json!({ "name": "Chess", "release_date": "2024-01-01T00:00:00Z", "game_category": 1, "owner": "alice" });

        let err = store.create(games, &fields(game.clone())).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "game_category"));

        store.create(categories, &fields(json!({ "name": "Board" }))).await.unwrap();
        let alice = json!("alice");
        let owner = [EnsureRow { entity: users, column: "username", value: &alice }];
        store.create_with(games, &fields(game), &owner).await.unwrap();
        assert_eq!(store.count(users, &Predicate::Always).await.unwrap(), 1);
        let err = store.delete(categories, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(store.delete(games, 1).await.unwrap());
        assert!(store.delete(categories, 1).await.unwrap());
        assert!(!store.delete(categories, 1).await.unwrap());
    }

    #[tokio::test]
    async fn evaluates_ranges_joins_and_ordering() {
        let (model, store) = store();
        let players = model.entity_by_path("players").unwrap();
        let games = model.entity_by_path("games").unwrap();
        let scores = model.entity_by_path("scores").unwrap();
        let categories = model.entity_by_path("game-categories").unwrap();
        let users = model.entity_by_path("users").unwrap();

        store.create(categories, &fields(json!({ "name": "Arcade" }))).await.unwrap();
        let alice = json!("alice");
        store
            .create_with(
                games,
                &fields(json!({ "name": "Pong", "release_date": "1972-11-29", "game_category": 1, "owner": "alice" })),
                &[EnsureRow { entity: users, column: "username", value: &alice }],
            )
            .await
            .unwrap();
        store.create(players, &fields(json!({ "name": "Ann" }))).await.unwrap();
        store.create(players, &fields(json!({ "name": "Bob" }))).await.unwrap();
        for (player, score, date) in [(1, 5, "2024-01-01"), (1, 15, "2024-02-01"), (2, 25, "2024-03-01")] {
            store
                .create(scores, &fields(json!({ "player": player, "game": 1, "score": score, "score_date": date })))
                .await
                .unwrap();
        }

        let rows = store.query(scores, &list(scores, &[("player_name", "Ann"), ("min_score", "10")])).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["score"], json!(15));

        let rows = store.query(scores, &list(scores, &[("ordering", "-score_date")])).await.unwrap();
        let ordered: Vec<_> = rows.iter().map(|r| r["score"].clone()).collect();
        assert_eq!(ordered, vec![json!(25), json!(15), json!(5)]);
        assert_eq!(rows[0]["score_date"], json!("2024-03-01T00:00:00+00:00"));

        let rows = store.query(games, &list(games, &[("search", "po")])).await.unwrap();
        assert_eq!(rows.len(), 1);
        let rows = store.query(games, &list(games, &[("search", "ong")])).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn paging_applies_after_ordering() {
        let (model, store) = store();
        let players = model.entity_by_path("players").unwrap();
        for name in ["Cy", "Al", "Bea"] {
            store.create(players, &fields(json!({ "name": name }))).await.unwrap();
        }
        let query = list(players, &[("ordering", "name"), ("limit", "1"), ("offset", "1")]);
        let rows = store.query(players, &query).await.unwrap();
        assert_eq!(rows, vec![json!({ "id": 3, "name": "Bea", "gender": "M" })]);
        assert_eq!(store.count(players, &query.predicate).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn failed_create_leaves_no_prerequisite_rows() {
        let (model, store) = store();
        let users = model.entity_by_path("users").unwrap();
        let games = model.entity_by_path("games").unwrap();
        let bob = json!("bob");
        let owner = [EnsureRow { entity: users, column: "username", value: &bob }];
        let game = json!({ "name": "Go", "release_date": "2024-01-01", "game_category": 9, "owner": "bob" });

        let err = store.create_with(games, &fields(game), &owner).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "game_category"));
        assert_eq!(store.count(users, &Predicate::Always).await.unwrap(), 0);
    }
}
