//! Process settings from environment variables (a `.env` file is loaded first by the binary).

use crate::error::ConfigError;
use crate::filter::Paging;
use crate::throttle::Rate;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Clone, Debug)]
pub struct ThrottleSettings {
    pub enabled: bool,
    /// Unauthenticated callers, keyed by client address.
    pub anon: Rate,
    /// Authenticated callers, keyed by username.
    pub user: Rate,
    /// Named scopes that replace anon/user rates for entities that declare them.
    pub scopes: HashMap<String, Rate>,
    /// Take the client address from `X-Forwarded-For`; only safe behind a proxy that sets it.
    pub trust_proxy: bool,
    /// Hard cap on distinct buckets held at once.
    pub max_tracked_keys: usize,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        ThrottleSettings {
            enabled: true,
            anon: Rate::per_hour(100),
            user: Rate::per_hour(1000),
            scopes: HashMap::from([("game-categories".to_string(), Rate::per_hour(30))]),
            trust_proxy: false,
            max_tracked_keys: 10_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub bind_addr: String,
    pub store: StoreKind,
    pub database_url: String,
    pub db_max_connections: u32,
    /// Overrides the schema named in the entity model.
    pub db_schema: Option<String>,
    /// Entity model file; the built-in model is used when unset.
    pub entity_config_path: Option<PathBuf>,
    pub jwt_secret: String,
    pub paging: Paging,
    pub max_body_bytes: usize,
    pub throttle: ThrottleSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bind_addr: "0.0.0.0:8000".into(),
            store: StoreKind::Postgres,
            database_url: "postgres://localhost/games".into(),
            db_max_connections: 5,
            db_schema: None,
            entity_config_path: None,
            jwt_secret: String::new(),
            paging: Paging::default(),
            max_body_bytes: 64 * 1024,
            throttle: ThrottleSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut s = Settings::default();

        if let Some(v) = lookup("BIND_ADDR") {
            s.bind_addr = v;
        }
        if let Some(v) = lookup("STORE") {
            s.store = match v.to_lowercase().as_str() {
                "postgres" | "pg" => StoreKind::Postgres,
                "memory" => StoreKind::Memory,
                other => {
                    return Err(ConfigError::Settings(format!(
                        "STORE must be postgres or memory, got '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(v) = lookup("DATABASE_URL") {
            s.database_url = v;
        }
        if let Some(v) = lookup("DB_MAX_CONNECTIONS") {
            s.db_max_connections = parse_number("DB_MAX_CONNECTIONS", &v)?;
        }
        s.db_schema = lookup("DB_SCHEMA").filter(|v| !v.is_empty());
        s.entity_config_path = lookup("ENTITY_CONFIG_PATH").filter(|v| !v.is_empty()).map(PathBuf::from);
        if let Some(v) = lookup("JWT_SECRET") {
            s.jwt_secret = v;
        }
        if let Some(v) = lookup("DEFAULT_PAGE_SIZE") {
            s.paging.default_limit = parse_number("DEFAULT_PAGE_SIZE", &v)?;
        }
        if let Some(v) = lookup("MAX_PAGE_SIZE") {
            s.paging.max_limit = parse_number("MAX_PAGE_SIZE", &v)?;
        }
        if s.paging.default_limit == 0 || s.paging.max_limit == 0 {
            return Err(ConfigError::Settings("page sizes must be at least 1".into()));
        }
        if let Some(v) = lookup("MAX_BODY_BYTES") {
            s.max_body_bytes = parse_number("MAX_BODY_BYTES", &v)?;
        }

        if let Some(v) = lookup("RATE_LIMIT_ENABLED") {
            s.throttle.enabled = v
                .parse()
                .map_err(|_| ConfigError::Settings(format!("RATE_LIMIT_ENABLED: '{}' is not a boolean", v)))?;
        }
        if let Some(v) = lookup("TRUST_PROXY") {
            s.throttle.trust_proxy = v
                .parse()
                .map_err(|_| ConfigError::Settings(format!("TRUST_PROXY: '{}' is not a boolean", v)))?;
        }
        if let Some(v) = lookup("THROTTLE_MAX_KEYS") {
            s.throttle.max_tracked_keys = parse_number("THROTTLE_MAX_KEYS", &v)?;
        }
        if let Some(v) = lookup("THROTTLE_ANON") {
            s.throttle.anon = parse_rate("THROTTLE_ANON", &v)?;
        }
        if let Some(v) = lookup("THROTTLE_USER") {
            s.throttle.user = parse_rate("THROTTLE_USER", &v)?;
        }
        if let Some(v) = lookup("THROTTLE_SCOPES") {
            // "game-categories=30/hour,scores=10/minute"
            for pair in v.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (scope, rate) = pair
                    .split_once('=')
                    .ok_or_else(|| ConfigError::Settings(format!("THROTTLE_SCOPES: expected scope=rate, got '{}'", pair)))?;
                s.throttle
                    .scopes
                    .insert(scope.trim().to_string(), parse_rate("THROTTLE_SCOPES", rate.trim())?);
            }
        }

        if s.store == StoreKind::Postgres && s.jwt_secret.is_empty() {
            tracing::warn!("JWT_SECRET is not set; every request will be anonymous");
        }
        Ok(s)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, v: &str) -> Result<T, ConfigError> {
    v.trim()
        .parse()
        .map_err(|_| ConfigError::Settings(format!("{}: '{}' is not a valid number", key, v)))
}

fn parse_rate(key: &str, v: &str) -> Result<Rate, ConfigError> {
    v.parse()
        .map_err(|e: String| ConfigError::Settings(format!("{}: {}", key, e)))
}
