//! Entity CRUD routes built from the resolved model.
//! Paths are parameterized so one set of handlers serves every entity; handlers resolve
//! the entity from the segment.

use crate::handlers::api_root;
use crate::handlers::entity::{create, delete as delete_handler, list, read, replace, update};
use crate::state::AppState;
use axum::{routing::get, Router};

/// Prefix under which the API root and entity collections are served.
pub const API_PREFIX: &str = "/api/v1";

pub fn entity_routes(state: AppState) -> Router {
    Router::new()
        .route(API_PREFIX, get(api_root))
        .route(&format!("{}/", API_PREFIX), get(api_root))
        .route(&format!("{}/:path_segment", API_PREFIX), get(list).post(create))
        .route(
            &format!("{}/:path_segment/:id", API_PREFIX),
            get(read).put(replace).patch(update).delete(delete_handler),
        )
        .with_state(state)
}
