//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from a resolved entity.
//! Identifiers come from config only; every client value is a bind parameter.

use crate::config::{ColumnRef, ResolvedEntity};
use crate::filter::{CompareOp, Field, FilterValue, ListQuery, Predicate};
use serde_json::Value;
use std::collections::HashMap;

const MAIN_ALIAS: &str = "main";
const JOIN_ALIAS: &str = "j";

/// Quote identifier for PostgreSQL (safe: only from config).
pub(crate) fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub(crate) fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// `$n` with an optional `::type` cast.
    fn placeholder(&mut self, v: Value, cast: Option<&str>) -> String {
        let n = self.push_param(v);
        match cast {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }
}

fn table_of(entity: &ResolvedEntity) -> String {
    qualified_table(&entity.schema_name, &entity.table_name)
}

fn select_column_list(entity: &ResolvedEntity, alias: Option<&str>) -> String {
    entity
        .columns
        .iter()
        .map(|c| match alias {
            Some(a) => format!("{}.{}", a, quoted(&c.name)),
            None => quoted(&c.name),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_cast<'a>(entity: &'a ResolvedEntity, column: &str) -> Option<&'a str> {
    entity.column(column).and_then(|c| c.pg_type.as_deref())
}

/// Operand cast by value type; integers and booleans already travel typed.
fn value_cast(value: &FilterValue) -> Option<&'static str> {
    match value {
        FilterValue::Timestamp(_) => Some("timestamptz"),
        _ => None,
    }
}

/// `\`, `%` and `_` are literal inside the prefix.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 1);
    for ch in s.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn comparison(q: &mut QueryBuf, lhs: &str, op: CompareOp, value: &FilterValue) -> String {
    match op {
        CompareOp::StartsWith => {
            let text = match value {
                FilterValue::Text(s) => s.clone(),
                other => other.to_json().to_string(),
            };
            let ph = q.placeholder(Value::String(format!("{}%", escape_like(&text))), None);
            format!("{}::text ILIKE {}", lhs, ph)
        }
        _ => {
            let sym = match op {
                CompareOp::Gte => ">=",
                CompareOp::Lte => "<=",
                _ => "=",
            };
            let ph = q.placeholder(value.to_json(), value_cast(value));
            format!("{} {} {}", lhs, sym, ph)
        }
    }
}

fn joined_lookup(q: &mut QueryBuf, via: &str, target: &ColumnRef, column: &str, op: CompareOp, value: &FilterValue) -> String {
    let inner = comparison(q, &format!("{}.{}", JOIN_ALIAS, quoted(column)), op, value);
    format!(
        "{}.{} IN (SELECT {}.{} FROM {} {} WHERE {})",
        MAIN_ALIAS,
        quoted(via),
        JOIN_ALIAS,
        quoted(&target.column),
        qualified_table(&target.schema_name, &target.table_name),
        JOIN_ALIAS,
        inner
    )
}

/// Render a predicate against the `main` alias, appending its parameters to `q`.
fn push_predicate(q: &mut QueryBuf, predicate: &Predicate) -> String {
    match predicate {
        Predicate::Always => "TRUE".into(),
        Predicate::Compare { field, op, value } => match field {
            Field::Column(column) => comparison(q, &format!("{}.{}", MAIN_ALIAS, quoted(column)), *op, value),
            Field::Joined { via, target, column } => joined_lookup(q, via, target, column, *op, value),
        },
        Predicate::And(parts) => {
            let rendered: Vec<String> = parts.iter().map(|p| push_predicate(q, p)).collect();
            format!("({})", rendered.join(" AND "))
        }
        Predicate::Or(parts) => {
            let rendered: Vec<String> = parts.iter().map(|p| push_predicate(q, p)).collect();
            format!("({})", rendered.join(" OR "))
        }
    }
}

fn where_clause(q: &mut QueryBuf, predicate: &Predicate) -> String {
    match predicate {
        Predicate::Always => String::new(),
        p => format!(" WHERE {}", push_predicate(q, p)),
    }
}

/// Requested ordering followed by the primary key, so pages are stable.
fn order_clause(entity: &ResolvedEntity, query: &ListQuery) -> String {
    let mut keys: Vec<String> = query
        .ordering
        .iter()
        .map(|k| format!("{}.{} {}", MAIN_ALIAS, quoted(&k.column), k.direction.to_sql()))
        .collect();
    if !query.ordering.iter().any(|k| k.column == entity.pk_column) {
        keys.push(format!("{}.{} ASC", MAIN_ALIAS, quoted(&entity.pk_column)));
    }
    format!(" ORDER BY {}", keys.join(", "))
}

/// One page of rows matching the list query.
pub fn select_list(entity: &ResolvedEntity, query: &ListQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let filter = where_clause(&mut q, &query.predicate);
    q.sql = format!(
        "SELECT {} FROM {} {}{}{} LIMIT {} OFFSET {}",
        select_column_list(entity, Some(MAIN_ALIAS)),
        table_of(entity),
        MAIN_ALIAS,
        filter,
        order_clause(entity, query),
        query.page.limit,
        query.page.offset
    );
    q
}

/// Total number of rows matching `predicate`, ignoring paging.
pub fn count_list(entity: &ResolvedEntity, predicate: &Predicate) -> QueryBuf {
    let mut q = QueryBuf::new();
    let filter = where_clause(&mut q, predicate);
    q.sql = format!("SELECT COUNT(*) FROM {} {}{}", table_of(entity), MAIN_ALIAS, filter);
    q
}

/// First row whose `column` equals `value`.
pub fn select_by_column(entity: &ResolvedEntity, column: &str, value: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(value.clone(), column_cast(entity, column));
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = {} LIMIT 1",
        select_column_list(entity, None),
        table_of(entity),
        quoted(column),
        ph
    );
    q
}

/// INSERT: values from body, primary key always server-assigned.
/// Omits columns with a DB default when body does not provide a value.
pub fn insert(entity: &ResolvedEntity, body: &HashMap<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in entity.columns.iter().filter(|c| c.name != entity.pk_column) {
        let val = body.get(&c.name).cloned();
        if val.is_none() && c.has_default {
            continue;
        }
        placeholders.push(q.placeholder(val.unwrap_or(Value::Null), c.pg_type.as_deref()));
        cols.push(quoted(&c.name));
    }
    q.sql = if cols.is_empty() {
        format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            table_of(entity),
            select_column_list(entity, None)
        )
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table_of(entity),
            cols.join(", "),
            placeholders.join(", "),
            select_column_list(entity, None)
        )
    };
    q
}

/// UPDATE by id: SET only known columns present in body. Without any, selects the row instead.
pub fn update(entity: &ResolvedEntity, id: i64, body: &HashMap<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    // config column order keeps the statement text stable
    for c in entity.columns.iter().filter(|c| c.name != entity.pk_column) {
        let Some(v) = body.get(&c.name) else { continue };
        let rhs = q.placeholder(v.clone(), c.pg_type.as_deref());
        sets.push(format!("{} = {}", quoted(&c.name), rhs));
    }
    if sets.is_empty() {
        return select_by_column(entity, &entity.pk_column, &Value::from(id));
    }
    let id_ph = q.placeholder(Value::from(id), None);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        table_of(entity),
        sets.join(", "),
        quoted(&entity.pk_column),
        id_ph,
        select_column_list(entity, None)
    );
    q
}

/// DELETE by id, returning the key when a row was removed.
pub fn delete(entity: &ResolvedEntity, id: i64) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(Value::from(id), None);
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} RETURNING {}",
        table_of(entity),
        quoted(&entity.pk_column),
        ph,
        quoted(&entity.pk_column)
    );
    q
}

/// Insert a row holding only `column = value` unless one exists. `column` must be unique.
pub fn insert_if_absent(entity: &ResolvedEntity, column: &str, value: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(value.clone(), column_cast(entity, column));
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING",
        table_of(entity),
        quoted(column),
        ph,
        quoted(column)
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin_config, resolve, ResolvedModel};
    use crate::filter::{build_list_query, Paging};
    use serde_json::json;

    fn model() -> ResolvedModel {
        resolve(&builtin_config().unwrap()).unwrap()
    }

    fn list_query(entity: &ResolvedEntity, pairs: &[(&str, &str)]) -> ListQuery {
        let params = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        build_list_query(entity, &params, Paging::default()).unwrap()
    }

    #[test]
    fn unfiltered_list_orders_by_key() {
        let model = model();
        let games = model.entity_by_path("games").unwrap();
        let q = select_list(games, &list_query(games, &[]));
        assert_eq!(
            q.sql,
            "SELECT main.\"id\", main.\"name\", main.\"release_date\", main.\"game_category\", main.\"played\", main.\"owner\" \
             FROM \"public\".\"games\" main ORDER BY main.\"id\" ASC LIMIT 5 OFFSET 0"
        );
        assert!(q.params.is_empty());
    }

    #[test]
    fn range_filters_bind_typed_operands() {
        let model = model();
        let scores = model.entity_by_path("scores").unwrap();
        let query = list_query(scores, &[("min_score", "10"), ("to_score_date", "2024-03-01"), ("ordering", "-score")]);
        let q = select_list(scores, &query);
        assert!(q.sql.contains("WHERE (main.\"score\" >= $1 AND main.\"score_date\" <= $2::timestamptz)"));
        assert!(q.sql.contains("ORDER BY main.\"score\" DESC, main.\"id\" ASC"));
        assert_eq!(q.params, vec![json!(10), json!("2024-03-01T00:00:00+00:00")]);
    }

    #[test]
    fn joined_filter_becomes_subquery() {
        let model = model();
        let scores = model.entity_by_path("scores").unwrap();
        let q = count_list(scores, &list_query(scores, &[("player_name", "Ann")]).predicate);
        assert_eq!(
            q.sql,
            "SELECT COUNT(*) FROM \"public\".\"player_scores\" main WHERE main.\"player\" IN \
             (SELECT j.\"id\" FROM \"public\".\"players\" j WHERE j.\"name\" = $1)"
        );
        assert_eq!(q.params, vec![json!("Ann")]);
    }

    #[test]
    fn search_is_escaped_prefix_match() {
        let model = model();
        let games = model.entity_by_path("games").unwrap();
        let q = select_list(games, &list_query(games, &[("search", "50%_off")]));
        assert!(q.sql.contains("WHERE main.\"name\"::text ILIKE $1"));
        assert_eq!(q.params, vec![json!("50\\%\\_off%")]);
    }

    #[test]
    fn insert_skips_key_and_absent_defaults() {
        let model = model();
        let games = model.entity_by_path("games").unwrap();
        let body: HashMap<String, Value> = [
            ("name".to_string(), json!("Chess")),
            ("release_date".to_string(), json!("2024-01-01T00:00:00Z")),
            ("game_category".to_string(), json!(1)),
            ("owner".to_string(), json!("alice")),
        ]
        .into_iter()
        .collect();
        let q = insert(games, &body);
        assert!(q.sql.starts_with(
            "INSERT INTO \"public\".\"games\" (\"name\", \"release_date\", \"game_category\", \"owner\") \
             VALUES ($1, $2::timestamptz, $3::bigint, $4) RETURNING"
        ));
        assert_eq!(q.params.len(), 4);
    }

    #[test]
    fn empty_update_falls_back_to_select() {
        let model = model();
        let players = model.entity_by_path("players").unwrap();
        let q = update(players, 7, &HashMap::new());
        assert!(q.sql.starts_with("SELECT"));
        assert_eq!(q.params, vec![json!(7)]);

        let body: HashMap<String, Value> = [("gender".to_string(), json!("F"))].into_iter().collect();
        let q = update(players, 7, &body);
        assert!(q.sql.contains("SET \"gender\" = $1 WHERE \"id\" = $2"));
    }

    #[test]
    fn insert_if_absent_uses_on_conflict() {
        let model = model();
        let users = model.entity_by_path("users").unwrap();
        let q = insert_if_absent(users, "username", &json!("alice"));
        assert_eq!(
            q.sql,
            "INSERT INTO \"public\".\"users\" (\"username\") VALUES ($1) ON CONFLICT (\"username\") DO NOTHING"
        );
    }
}
