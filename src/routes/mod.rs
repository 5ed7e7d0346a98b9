//! Router assembly.

mod common;
mod entity;

pub use common::common_routes;
pub use entity::{entity_routes, API_PREFIX};

use crate::state::AppState;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// The whole service: common routes, API root and entity routes, with tracing and a body size cap.
pub fn app(state: AppState) -> Router {
    let max_body = state.settings.max_body_bytes;
    Router::new()
        .merge(common_routes(state.clone()))
        .merge(entity_routes(state))
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(TraceLayer::new_for_http())
}
