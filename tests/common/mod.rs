//! Shared helpers: an in-memory app and a JSON request helper.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use games_api::{app, builtin_config, issue_token, resolve, AppState, MemoryStore, Settings, StoreKind};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const SECRET: &str = "integration-secret";

pub fn settings() -> Settings {
    let mut s = Settings::default();
    s.store = StoreKind::Memory;
    s.jwt_secret = SECRET.into();
    s.throttle.enabled = false;
    s
}

pub fn app_with(settings: Settings) -> Router {
    let model = Arc::new(resolve(&builtin_config().unwrap()).unwrap());
    let store = Arc::new(MemoryStore::new(model.clone()));
    app(AppState::new(store, model, settings))
}

pub fn test_app() -> Router {
    app_with(settings())
}

pub fn token(username: &str) -> String {
    issue_token(username, SECRET, 3600).unwrap()
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Value,
}

pub async fn send(router: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }
    let request = match body {
        Some(b) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    Reply { status, headers, body }
}

pub async fn get(router: &Router, uri: &str) -> Reply {
    send(router, Method::GET, uri, None, None).await
}

/// POST expecting 201; returns the created row.
pub async fn create(router: &Router, path: &str, token: Option<&str>, body: Value) -> Value {
    let reply = send(router, Method::POST, &format!("/api/v1/{}", path), token, Some(body)).await;
    assert_eq!(reply.status, StatusCode::CREATED, "create {} failed: {}", path, reply.body);
    reply.body["data"].clone()
}
