//! `games-api` serves the API; `games-api token <username> [ttl-secs]` prints a bearer token
//! signed with `JWT_SECRET` for local use.

use games_api::store::{connect, ensure_database_exists};
use games_api::{
    app, apply_migrations, builtin_config, issue_token, load_from_path, resolve, AppState, EntityStore, MemoryStore,
    PgStore, Settings, StoreKind,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

const DEFAULT_TOKEN_TTL_SECS: i64 = 24 * 3600;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("games_api=info,tower_http=info")),
        )
        .init();

    let settings = Settings::from_env()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("token") {
        let username = args.get(1).ok_or("usage: games-api token <username> [ttl-secs]")?;
        let ttl = match args.get(2) {
            Some(v) => v.parse()?,
            None => DEFAULT_TOKEN_TTL_SECS,
        };
        println!("{}", issue_token(username, &settings.jwt_secret, ttl)?);
        return Ok(());
    }

    let mut config = match &settings.entity_config_path {
        Some(path) => load_from_path(path).await?,
        None => builtin_config()?,
    };
    if let Some(schema) = &settings.db_schema {
        config.schema = schema.clone();
    }
    let model = Arc::new(resolve(&config)?);

    let store: Arc<dyn EntityStore> = match settings.store {
        StoreKind::Postgres => {
            ensure_database_exists(&settings.database_url).await?;
            let pool = connect(&settings.database_url, settings.db_max_connections).await?;
            apply_migrations(&pool, &model).await?;
            Arc::new(PgStore::new(pool))
        }
        StoreKind::Memory => {
            tracing::warn!("using the in-memory store; data is lost on exit");
            Arc::new(MemoryStore::new(model.clone()))
        }
    };

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    let state = AppState::new(store, model, settings);
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app(state).into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
