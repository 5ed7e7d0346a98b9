//! Typed errors and HTTP mapping.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: table {table} column {column}")]
    InvalidPrimaryKey { table: String, column: String },
    #[error("duplicate path segment: {0}")]
    DuplicatePathSegment(String),
    #[error("unknown column '{column}' on {entity}")]
    UnknownColumn { entity: String, column: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("settings: {0}")]
    Settings(String),
}

/// Why the authorization gate refused a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    NotAuthenticated,
    NotOwner,
}

impl DenyReason {
    fn code(self) -> &'static str {
        match self {
            DenyReason::NotAuthenticated => "not_authenticated",
            DenyReason::NotOwner => "permission_denied",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::NotAuthenticated => f.write_str("authentication credentials were not provided"),
            DenyReason::NotOwner => f.write_str("only the owner may modify this object"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{field}: {message}")]
    Validation { field: String, message: String },
    #[error("forbidden: {0}")]
    Forbidden(DenyReason),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("request was throttled ({scope}); retry in {retry_after} seconds")]
    RateLimited { scope: String, retry_after: u64 },
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Validation { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::Forbidden(reason) => (StatusCode::FORBIDDEN, reason.code()),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "authentication_failed"),
            AppError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "not_found")
                } else {
                    tracing::error!(error = %e, "database error");
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::MethodNotAllowed(_) => (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed"),
            AppError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "throttled"),
        };
        let details = match &self {
            AppError::Validation { field, .. } => Some(serde_json::json!({ "field": field })),
            AppError::RateLimited { scope, retry_after } => {
                Some(serde_json::json!({ "scope": scope, "retry_after": retry_after }))
            }
            _ => None,
        };
        let retry_after = match &self {
            AppError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details,
            },
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn validation_error_names_the_field() {
        let response = AppError::validation("min_score", "'x' is not a valid integer").into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "validation_error");
        assert_eq!(body["error"]["details"]["field"], "min_score");
    }

    #[test]
    fn throttled_response_carries_retry_after() {
        let response = AppError::RateLimited {
            scope: "anon".into(),
            retry_after: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn deny_reasons_map_to_forbidden() {
        for reason in [DenyReason::NotAuthenticated, DenyReason::NotOwner] {
            assert_eq!(AppError::Forbidden(reason).into_response().status(), StatusCode::FORBIDDEN);
        }
    }
}
