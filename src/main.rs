use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use storedesk::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    provider::{MockIdentityProvider, ProviderFactoryState, SupabaseAuthClient},
    repository::{InMemoryRepository, PostgresRepository, RepositoryState},
};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, sets up logging, connects the profile store and the
/// auth provider, starts the visitor registry and serves the console API.
#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "storedesk=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Console starting in {:?} mode", config.env);

    let (repo, provider): (RepositoryState, ProviderFactoryState) = if config.uses_local_fallback() {
        tracing::warn!("DATABASE_URL not set: using in-memory profile store and mock auth provider");
        let mock = MockIdentityProvider::new();
        if let Some((email, password)) = &config.local_account {
            // The store starts empty, so this account's first login is promoted.
            mock.add_account(email, password);
            tracing::info!("Seeded local account {}", email);
        }
        (
            Arc::new(InMemoryRepository::new()) as RepositoryState,
            Arc::new(mock) as ProviderFactoryState,
        )
    } else {
        // AppConfig::load guarantees DATABASE_URL whenever the fallback is off.
        let db_url = config
            .db_url
            .as_deref()
            .expect("FATAL: DATABASE_URL missing outside the local fallback.");

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("FATAL: Failed to apply profile store migrations.");

        (
            Arc::new(PostgresRepository::new(pool)) as RepositoryState,
            Arc::new(SupabaseAuthClient::new(&config)) as ProviderFactoryState,
        )
    };

    let bind_addr = config.bind_addr.clone();
    let app_state = AppState::start(provider, repo, config);
    let app = create_router(app_state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind the console listener.");

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://{}/swagger-ui", bind_addr);

    axum::serve(listener, app)
        .await
        .expect("FATAL: Console server terminated unexpectedly.");
}
