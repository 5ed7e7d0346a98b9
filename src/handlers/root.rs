//! API root: links to every exposed collection.

use crate::auth::Caller;
use crate::error::AppError;
use crate::state::AppState;
use crate::throttle::ClientAddr;
use axum::{
    extract::{OriginalUri, State},
    Json,
};
use serde_json::{Map, Value};

pub async fn api_root(
    State(state): State<AppState>,
    caller: Caller,
    client: ClientAddr,
    OriginalUri(uri): OriginalUri,
) -> Result<Json<Value>, AppError> {
    state.limiter.check(None, &caller, &client)?;
    let base = uri.path().trim_end_matches('/');
    let links: Map<String, Value> = state
        .model
        .entities
        .iter()
        .map(|e| (e.path_segment.clone(), Value::String(format!("{}/{}", base, e.path_segment))))
        .collect();
    Ok(Json(Value::Object(links)))
}
