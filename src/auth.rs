//! Caller identity from a bearer JWT (HS256). Missing credentials mean an anonymous caller.

use crate::error::AppError;
use crate::state::AppState;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Username of the caller.
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

/// Who is making the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    User(String),
}

impl Caller {
    pub fn username(&self) -> Option<&str> {
        match self {
            Caller::Anonymous => None,
            Caller::User(name) => Some(name),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Caller::User(_))
    }
}

/// Sign a token for `username`, valid for `ttl_secs`.
pub fn issue_token(username: &str, secret: &str, ttl_secs: i64) -> Result<String, AppError> {
    if secret.is_empty() {
        return Err(AppError::Unauthorized("JWT secret not configured".into()));
    }
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: username.to_string(),
        exp: now + ttl_secs,
        iat: now,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| AppError::Unauthorized(format!("token generation failed: {}", e)))
}

/// Resolve the caller from the `Authorization` header.
/// No header: anonymous. A header that is present but invalid is an error, not anonymity.
pub fn caller_from_headers(headers: &HeaderMap, secret: &str) -> Result<Caller, AppError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(Caller::Anonymous);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::Unauthorized("invalid Authorization header".into()))?;
    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Authorization header must use Bearer token format".into()))?;
    if secret.is_empty() {
        return Err(AppError::Unauthorized("JWT secret not configured".into()));
    }
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map_err(|e| AppError::Unauthorized(format!("invalid token: {}", e)))?;
    if data.claims.sub.trim().is_empty() {
        return Err(AppError::Unauthorized("token has no subject".into()));
    }
    Ok(Caller::User(data.claims.sub))
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(caller) = parts.extensions.get::<Caller>() {
            return Ok(caller.clone());
        }
        caller_from_headers(&parts.headers, &state.settings.jwt_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret";

    fn bearer(token: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", token)).unwrap());
        h
    }

    #[test]
    fn no_header_is_anonymous() {
        assert_eq!(caller_from_headers(&HeaderMap::new(), SECRET).unwrap(), Caller::Anonymous);
    }

    #[test]
    fn valid_token_yields_user() {
        let token = issue_token("alice", SECRET, 60).unwrap();
        assert_eq!(
            caller_from_headers(&bearer(&token), SECRET).unwrap(),
            Caller::User("alice".into())
        );
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = issue_token("alice", "other", 60).unwrap();
        assert!(matches!(
            caller_from_headers(&bearer(&token), SECRET),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn non_bearer_scheme_is_rejected() {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic YWxpY2U6cHc="));
        assert!(matches!(caller_from_headers(&h, SECRET), Err(AppError::Unauthorized(_))));
    }
}
