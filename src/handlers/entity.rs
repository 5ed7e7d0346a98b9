//! Entity CRUD handlers: list, read, create, update (PUT/PATCH), delete.
//! The entity is resolved from the path segment; everything else comes from its config.

use crate::auth::Caller;
use crate::config::ResolvedEntity;
use crate::error::{AppError, ConfigError};
use crate::filter::build_list_query;
use crate::permission::{authorize, authorize_request, row_owner, stamp_owner, Action};
use crate::response::{success_one, success_one_ok, success_page};
use crate::service::RequestValidator;
use crate::state::AppState;
use crate::store::EnsureRow;
use crate::throttle::ClientAddr;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

/// Entity for `path_segment`, provided it exposes `operation`.
fn entity_for<'a>(state: &'a AppState, path_segment: &str, operation: &str) -> Result<&'a ResolvedEntity, AppError> {
    let entity = state
        .model
        .entity_by_path(path_segment)
        .ok_or_else(|| AppError::NotFound(format!("no entity at '{}'", path_segment)))?;
    if !entity.allows(operation) {
        return Err(AppError::MethodNotAllowed(format!("{} does not allow {}", path_segment, operation)));
    }
    Ok(entity)
}

fn not_found(entity: &ResolvedEntity, id: &str) -> AppError {
    AppError::NotFound(format!("{} {}", entity.path_segment, id))
}

/// Keys are integers; anything else cannot name a row.
fn parse_id(entity: &ResolvedEntity, id_str: &str) -> Result<i64, AppError> {
    id_str.parse().map_err(|_| not_found(entity, id_str))
}

fn body_to_map(value: Value) -> Result<HashMap<String, Value>, AppError> {
    match value {
        Value::Object(m) => Ok(m.into_iter().collect()),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

fn target_entity<'a>(state: &'a AppState, path_segment: &str) -> Result<&'a ResolvedEntity, AppError> {
    state.model.entity_by_path(path_segment).ok_or_else(|| {
        AppError::Config(ConfigError::MissingReference {
            kind: "entity",
            id: path_segment.to_string(),
        })
    })
}

/// Every non-null reference in `body` must name an existing row. The owner column is
/// exempt: its row is created on demand, see [`owner_row`].
async fn check_references(state: &AppState, entity: &ResolvedEntity, body: &HashMap<String, Value>) -> Result<(), AppError> {
    for c in &entity.columns {
        let Some(r) = &c.references else { continue };
        if entity.owner_column.as_deref() == Some(c.name.as_str()) {
            continue;
        }
        let Some(value) = body.get(&c.name).filter(|v| !v.is_null()) else { continue };
        let target = target_entity(state, &r.entity)?;
        if state.store.find_by(target, &r.column, value).await?.is_none() {
            return Err(AppError::validation(
                &c.name,
                format!("invalid {} {}: object does not exist", r.column, value),
            ));
        }
    }
    Ok(())
}

/// Callers are known by token only, so the row their ownership points at is created
/// together with the row that references it.
fn owner_row<'a>(state: &'a AppState, entity: &'a ResolvedEntity, body: &'a HashMap<String, Value>) -> Result<Option<EnsureRow<'a>>, AppError> {
    let Some(column) = entity.owner_column.as_deref().and_then(|c| entity.column(c)) else {
        return Ok(None);
    };
    let (Some(r), Some(value)) = (&column.references, body.get(&column.name)) else {
        return Ok(None);
    };
    Ok(Some(EnsureRow {
        entity: target_entity(state, &r.entity)?,
        column: &r.column,
        value,
    }))
}

pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
    client: ClientAddr,
    Path(path_segment): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &path_segment, "read")?;
    state.limiter.check(Some(entity), &caller, &client)?;
    let query = build_list_query(entity, &params, state.settings.paging)?;
    let rows = state.store.query(entity, &query).await?;
    let count = state.store.count(entity, &query.predicate).await?;
    Ok(success_page(rows, count, query.page))
}

pub async fn read(
    State(state): State<AppState>,
    caller: Caller,
    client: ClientAddr,
    Path((path_segment, id_str)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &path_segment, "read")?;
    state.limiter.check(Some(entity), &caller, &client)?;
    let id = parse_id(entity, &id_str)?;
    let row = state
        .store
        .get(entity, id)
        .await?
        .ok_or_else(|| not_found(entity, &id_str))?;
    Ok(success_one_ok(row))
}

pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    client: ClientAddr,
    Path(path_segment): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &path_segment, "create")?;
    authorize_request(entity.write_policy, Action::Create, &caller)?;
    state.limiter.check(Some(entity), &caller, &client)?;
    authorize(entity.write_policy, Action::Create, &caller, None)?;

    let mut body = body_to_map(body)?;
    stamp_owner(entity, Action::Create, &caller, &mut body);
    RequestValidator::coerce(entity, &mut body)?;
    RequestValidator::validate(&body, &entity.validation)?;
    check_references(&state, entity, &body).await?;

    let ensure: Vec<EnsureRow<'_>> = owner_row(&state, entity, &body)?.into_iter().collect();
    let row = state.store.create_with(entity, &body, &ensure).await?;
    tracing::info!(entity = %entity.path_segment, id = ?row.get(&entity.pk_column), "created");
    Ok(success_one(row))
}

/// PUT validates the body as a whole object; PATCH only the fields it carries.
async fn write(
    state: AppState,
    caller: Caller,
    client: ClientAddr,
    path_segment: String,
    id_str: String,
    body: Value,
    partial: bool,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &path_segment, "update")?;
    authorize_request(entity.write_policy, Action::Update, &caller)?;
    state.limiter.check(Some(entity), &caller, &client)?;
    let id = parse_id(entity, &id_str)?;
    let existing = state
        .store
        .get(entity, id)
        .await?
        .ok_or_else(|| not_found(entity, &id_str))?;
    authorize(entity.write_policy, Action::Update, &caller, row_owner(entity, &existing))?;

    let mut body = body_to_map(body)?;
    stamp_owner(entity, Action::Update, &caller, &mut body);
    RequestValidator::coerce(entity, &mut body)?;
    if partial {
        RequestValidator::validate_partial(&body, &entity.validation)?;
    } else {
        RequestValidator::validate(&body, &entity.validation)?;
    }
    check_references(&state, entity, &body).await?;

    let row = state
        .store
        .update(entity, id, &body)
        .await?
        .ok_or_else(|| not_found(entity, &id_str))?;
    tracing::info!(entity = %entity.path_segment, id, "updated");
    Ok(success_one_ok(row))
}

pub async fn replace(
    State(state): State<AppState>,
    caller: Caller,
    client: ClientAddr,
    Path((path_segment, id_str)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    write(state, caller, client, path_segment, id_str, body, false).await
}

pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    client: ClientAddr,
    Path((path_segment, id_str)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    write(state, caller, client, path_segment, id_str, body, true).await
}

pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    client: ClientAddr,
    Path((path_segment, id_str)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let entity = entity_for(&state, &path_segment, "delete")?;
    authorize_request(entity.write_policy, Action::Delete, &caller)?;
    state.limiter.check(Some(entity), &caller, &client)?;
    let id = parse_id(entity, &id_str)?;
    let existing = state
        .store
        .get(entity, id)
        .await?
        .ok_or_else(|| not_found(entity, &id_str))?;
    authorize(entity.write_policy, Action::Delete, &caller, row_owner(entity, &existing))?;

    if !state.store.delete(entity, id).await? {
        return Err(not_found(entity, &id_str));
    }
    tracing::info!(entity = %entity.path_segment, id, "deleted");
    Ok(StatusCode::NO_CONTENT)
}
