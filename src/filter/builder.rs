//! Query parameters -> predicate, ordering and page for one entity.

use crate::config::{RangeBound, ResolvedEntity, ValueKind};
use crate::error::AppError;
use crate::filter::ordering::{parse_ordering, OrderKey};
use crate::filter::predicate::{CompareOp, Field, FilterValue, Predicate};
use std::collections::HashMap;

pub const SEARCH_PARAM: &str = "search";
pub const ORDERING_PARAM: &str = "ordering";
pub const LIMIT_PARAM: &str = "limit";
pub const OFFSET_PARAM: &str = "offset";

/// Page size bounds, from settings.
#[derive(Clone, Copy, Debug)]
pub struct Paging {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for Paging {
    fn default() -> Self {
        Paging {
            default_limit: 5,
            max_limit: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

/// Everything a store needs to answer a list request.
#[derive(Clone, Debug, PartialEq)]
pub struct ListQuery {
    pub predicate: Predicate,
    pub ordering: Vec<OrderKey>,
    pub page: Page,
}

/// Conjunction of every configured filter whose parameter is present and non-empty.
/// Parameters the entity does not recognize are ignored.
pub fn build_predicate(entity: &ResolvedEntity, params: &HashMap<String, String>) -> Result<Predicate, AppError> {
    let present = |param: &str| params.get(param).filter(|v| !v.trim().is_empty());
    let parse = |param: &str, kind: ValueKind, raw: &str| {
        FilterValue::parse(kind, raw).map_err(|message| AppError::validation(param, message))
    };

    let mut parts = Vec::new();

    for f in &entity.filters.exact {
        if let Some(raw) = present(f.param.as_str()) {
            let value = parse(f.param.as_str(), f.kind, raw.as_str())?;
            parts.push(Predicate::column(f.column.as_str(), CompareOp::Eq, value));
        }
    }

    for f in &entity.filters.range {
        if let Some(raw) = present(f.param.as_str()) {
            let value = parse(f.param.as_str(), f.kind, raw.as_str())?;
            let op = match f.bound {
                RangeBound::Min => CompareOp::Gte,
                RangeBound::Max => CompareOp::Lte,
            };
            parts.push(Predicate::column(f.column.as_str(), op, value));
        }
    }

    for f in &entity.filters.joined {
        if let Some(raw) = present(f.param.as_str()) {
            let value = parse(f.param.as_str(), f.kind, raw.as_str())?;
            parts.push(Predicate::Compare {
                field: Field::Joined {
                    via: f.via.clone(),
                    target: f.target.clone(),
                    column: f.column.clone(),
                },
                op: CompareOp::Eq,
                value,
            });
        }
    }

    if let Some(term) = present(SEARCH_PARAM) {
        if !entity.search_fields.is_empty() {
            let term = term.trim().to_string();
            let any_field = entity
                .search_fields
                .iter()
                .map(|c| Predicate::column(c.as_str(), CompareOp::StartsWith, FilterValue::Text(term.clone())))
                .collect();
            parts.push(Predicate::or(any_field));
        }
    }

    Ok(Predicate::and(parts))
}

fn parse_page_param(params: &HashMap<String, String>, name: &str) -> Result<Option<u32>, AppError> {
    match params.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse::<u32>()
            .map(Some)
            .map_err(|_| AppError::validation(name, format!("'{}' is not a non-negative integer", v))),
    }
}

/// Build predicate, validated ordering and page from the raw query string map.
pub fn build_list_query(
    entity: &ResolvedEntity,
    params: &HashMap<String, String>,
    paging: Paging,
) -> Result<ListQuery, AppError> {
    let predicate = build_predicate(entity, params)?;
    let ordering = match params.get(ORDERING_PARAM) {
        Some(raw) => parse_ordering(entity, raw)?,
        None => Vec::new(),
    };
    let limit = match parse_page_param(params, LIMIT_PARAM)? {
        Some(0) => return Err(AppError::validation(LIMIT_PARAM, "must be at least 1")),
        Some(n) => n.min(paging.max_limit),
        None => paging.default_limit.min(paging.max_limit),
    };
    let offset = parse_page_param(params, OFFSET_PARAM)?.unwrap_or(0);
    Ok(ListQuery {
        predicate,
        ordering,
        page: Page { limit, offset },
    })
}
