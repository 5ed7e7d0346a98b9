//! Games API: a configuration-driven REST service for games, game categories,
//! players and player scores.

pub mod auth;
pub mod config;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod migration;
pub mod permission;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;
pub mod store;
pub mod throttle;

pub use auth::{issue_token, Caller};
pub use config::{builtin_config, load_from_path, resolve, ResolvedEntity, ResolvedModel};
pub use error::{AppError, ConfigError};
pub use migration::apply_migrations;
pub use routes::{app, common_routes, entity_routes, API_PREFIX};
pub use settings::{Settings, StoreKind};
pub use state::AppState;
pub use store::{EnsureRow, EntityStore, MemoryStore, PgStore};
