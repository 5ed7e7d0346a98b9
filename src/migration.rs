//! Create the schema and entity tables from the resolved model.
//! Tables are created in reference order, with foreign keys inline.

use crate::config::{ResolvedEntity, ResolvedModel};
use crate::error::{AppError, ConfigError};
use crate::sql::{qualified_table, quoted};
use sqlx::PgPool;
use std::collections::HashSet;

/// Idempotent DDL for `model`: `CREATE SCHEMA` then one `CREATE TABLE IF NOT EXISTS` per entity.
pub fn migration_statements(model: &ResolvedModel) -> Result<Vec<String>, AppError> {
    let mut out = Vec::new();
    let schemas: HashSet<&str> = model.entities.iter().map(|e| e.schema_name.as_str()).collect();
    let mut schemas: Vec<&str> = schemas.into_iter().collect();
    schemas.sort();
    for s in schemas {
        out.push(format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(s)));
    }
    for entity in creation_order(model)? {
        out.push(create_table(entity));
    }
    Ok(out)
}

/// Apply [`migration_statements`] in order.
pub async fn apply_migrations(pool: &PgPool, model: &ResolvedModel) -> Result<(), AppError> {
    for sql in migration_statements(model)? {
        tracing::debug!(sql = %sql, "migration");
        sqlx::query(&sql).execute(pool).await?;
    }
    tracing::info!(tables = model.entities.len(), "migrations applied");
    Ok(())
}

/// Referenced tables before referencing ones; config order otherwise.
fn creation_order(model: &ResolvedModel) -> Result<Vec<&ResolvedEntity>, AppError> {
    let mut done: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(model.entities.len());
    while ordered.len() < model.entities.len() {
        let ready = model.entities.iter().find(|e| {
            !done.contains(e.path_segment.as_str())
                && e.columns
                    .iter()
                    .filter_map(|c| c.references.as_ref())
                    .all(|r| r.entity == e.path_segment || done.contains(r.entity.as_str()))
        });
        let Some(entity) = ready else {
            return Err(AppError::Config(ConfigError::Validation(
                "entity references form a cycle".into(),
            )));
        };
        done.insert(entity.path_segment.as_str());
        ordered.push(entity);
    }
    Ok(ordered)
}

fn create_table(entity: &ResolvedEntity) -> String {
    let mut defs: Vec<String> = Vec::new();
    for c in &entity.columns {
        let mut def = format!("{} {}", quoted(&c.name), c.ddl_type);
        if !c.nullable || c.name == entity.pk_column {
            def.push_str(" NOT NULL");
        }
        if let Some(d) = &c.default_sql {
            def.push_str(" DEFAULT ");
            def.push_str(d);
        }
        defs.push(def);
    }
    defs.push(format!("PRIMARY KEY ({})", quoted(&entity.pk_column)));
    for c in entity.columns.iter().filter(|c| c.unique) {
        defs.push(format!(
            "CONSTRAINT {} UNIQUE ({})",
            quoted(&format!("{}_{}_key", entity.table_name, c.name)),
            quoted(&c.name)
        ));
    }
    for c in &entity.columns {
        let Some(r) = &c.references else { continue };
        // deletes of referenced rows are refused, never cascaded
        defs.push(format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE NO ACTION",
            quoted(&format!("{}_{}_fkey", entity.table_name, c.name)),
            quoted(&c.name),
            qualified_table(&r.schema_name, &r.table_name),
            quoted(&r.column)
        ));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        qualified_table(&entity.schema_name, &entity.table_name),
        defs.join(",\n  ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin_config, resolve};

    #[test]
    fn referenced_tables_come_first() {
        let model = resolve(&builtin_config().unwrap()).unwrap();
        let stmts = migration_statements(&model).unwrap();
        assert_eq!(stmts[0], "CREATE SCHEMA IF NOT EXISTS \"public\"");
        let pos = |table: &str| {
            stmts
                .iter()
                .position(|s| s.starts_with(&format!("CREATE TABLE IF NOT EXISTS \"public\".\"{}\"", table)))
                .unwrap()
        };
        assert!(pos("users") < pos("games"));
        assert!(pos("game_categories") < pos("games"));
        assert!(pos("games") < pos("player_scores"));
        assert!(pos("players") < pos("player_scores"));
    }

    #[test]
    fn games_table_ddl() {
        let model = resolve(&builtin_config().unwrap()).unwrap();
        let ddl = create_table(model.entity_by_path("games").unwrap());
        assert!(ddl.contains("\"id\" bigserial NOT NULL"));
        assert!(ddl.contains("\"played\" boolean NOT NULL DEFAULT false"));
        assert!(ddl.contains(
            "CONSTRAINT \"games_owner_fkey\" FOREIGN KEY (\"owner\") REFERENCES \"public\".\"users\" (\"username\") ON DELETE NO ACTION"
        ));
        assert!(ddl.contains("PRIMARY KEY (\"id\")"));
    }

    #[test]
    fn unique_columns_get_constraints() {
        let model = resolve(&builtin_config().unwrap()).unwrap();
        let ddl = create_table(model.entity_by_path("game-categories").unwrap());
        assert!(ddl.contains("CONSTRAINT \"game_categories_name_key\" UNIQUE (\"name\")"));
    }
}
