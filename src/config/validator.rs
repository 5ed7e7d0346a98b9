//! Config validation: referential integrity and API consistency.

use crate::config::{EntityConfig, ModelConfig, WritePolicy};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

const KNOWN_OPERATIONS: &[&str] = &["read", "create", "update", "delete"];

pub fn validate(config: &ModelConfig) -> Result<(), ConfigError> {
    let mut by_path: HashMap<&str, &EntityConfig> = HashMap::new();
    for e in &config.entities {
        if by_path.insert(e.path_segment.as_str(), e).is_some() {
            return Err(ConfigError::DuplicatePathSegment(e.path_segment.clone()));
        }
    }

    for e in &config.entities {
        let columns: HashSet<&str> = e.columns.iter().map(|c| c.name.as_str()).collect();
        let require_column = |column: &str| -> Result<(), ConfigError> {
            if columns.contains(column) {
                Ok(())
            } else {
                Err(ConfigError::UnknownColumn {
                    entity: e.path_segment.clone(),
                    column: column.to_string(),
                })
            }
        };

        if !columns.contains(e.primary_key.as_str()) {
            return Err(ConfigError::InvalidPrimaryKey {
                table: e.table.clone(),
                column: e.primary_key.clone(),
            });
        }

        for op in &e.operations {
            if !KNOWN_OPERATIONS.contains(&op.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "{}: unknown operation '{}'",
                    e.path_segment, op
                )));
            }
        }

        for c in &e.columns {
            let Some(r) = &c.references else { continue };
            let target = by_path.get(r.entity.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: r.entity.clone(),
            })?;
            let target_col = r.column.as_deref().unwrap_or(&target.primary_key);
            if !target.columns.iter().any(|tc| tc.name == target_col) {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", r.entity, target_col),
                });
            }
        }

        let mut params = HashSet::new();
        let filter_params = e
            .filters
            .exact
            .iter()
            .map(|f| f.param.as_str())
            .chain(e.filters.range.iter().map(|f| f.param.as_str()))
            .chain(e.filters.joined.iter().map(|f| f.param.as_str()));
        for p in filter_params {
            if matches!(p, "search" | "ordering" | "limit" | "offset") {
                return Err(ConfigError::Validation(format!(
                    "{}: filter parameter '{}' is reserved",
                    e.path_segment, p
                )));
            }
            if !params.insert(p) {
                return Err(ConfigError::Validation(format!(
                    "{}: duplicate filter parameter '{}'",
                    e.path_segment, p
                )));
            }
        }

        for f in &e.filters.exact {
            require_column(f.column.as_deref().unwrap_or(&f.param))?;
        }
        for f in &e.filters.range {
            require_column(&f.column)?;
        }
        for f in &e.filters.joined {
            require_column(&f.via)?;
            let via = e.columns.iter().find(|c| c.name == f.via);
            let reference = via.and_then(|c| c.references.as_ref()).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "{}: joined filter '{}' goes through '{}', which is not a reference",
                    e.path_segment, f.param, f.via
                ))
            })?;
            let target = by_path.get(reference.entity.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: reference.entity.clone(),
            })?;
            if !target.columns.iter().any(|tc| tc.name == f.column) {
                return Err(ConfigError::UnknownColumn {
                    entity: target.path_segment.clone(),
                    column: f.column.clone(),
                });
            }
        }
        for c in &e.search {
            require_column(c)?;
        }
        for c in &e.ordering {
            require_column(c)?;
        }
        for c in e.validation.keys() {
            require_column(c)?;
        }

        match (e.write_policy, e.owner_column.as_deref()) {
            (WritePolicy::Owner, None) => {
                return Err(ConfigError::Validation(format!(
                    "{}: write_policy 'owner' requires owner_column",
                    e.path_segment
                )));
            }
            (_, Some(owner)) => require_column(owner)?,
            (WritePolicy::Open, None) => {}
        }
    }

    Ok(())
}
