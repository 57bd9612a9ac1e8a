use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod authority;
pub mod config;
pub mod guard;
pub mod handlers;
pub mod models;
pub mod provider;
pub mod registry;
pub mod repository;
pub mod session;

// Routers split by required privilege (public, any admin, super admin).
pub mod routes;
use guard::RequireAdmin;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use authority::{AuthorityState, SessionAuthority};
pub use config::AppConfig;
pub use provider::{
    MockIdentityProvider, ProviderFactoryState, ProviderState, SupabaseAuthClient,
};
pub use registry::{RegistryState, SessionRegistry};
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use session::{SessionSnapshot, SessionStatus};

/// ApiDoc
///
/// OpenAPI document for the console API, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_session, handlers::login, handlers::logout,
        handlers::refresh_session, handlers::register, handlers::get_store_scope,
        handlers::list_users, handlers::assign_profile
    ),
    components(
        schemas(
            models::AdminRole, models::Profile, models::NewProfile, models::ProfileEntry,
            models::StoreScope, models::LoginRequest, models::RegisterRequest,
            models::RegisterResponse, models::ErrorBody,
            session::SessionSnapshot, session::SessionStatus, session::DenialReason,
        )
    ),
    tags(
        (name = "storedesk", description = "Retail admin console session API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Everything the handlers need: the registry of per-visitor session
/// authorities, the profile store for user management, and the loaded
/// configuration (read by `create_router` for the session cookie).
#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryState,
    pub repo: RepositoryState,
    pub config: AppConfig,
}

impl AppState {
    /// Builds the visitor registry over the given collaborators and starts
    /// its idle sweeper. Must be called inside a Tokio runtime.
    pub fn start(provider: ProviderFactoryState, repo: RepositoryState, config: AppConfig) -> Self {
        let registry = std::sync::Arc::new(SessionRegistry::new(
            provider,
            repo.clone(),
            config.resolve_timeout,
        ));
        registry.spawn_sweeper(config.session_idle_timeout);

        Self {
            registry,
            repo,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RegistryState {
    fn from_ref(app_state: &AppState) -> RegistryState {
        app_state.registry.clone()
    }
}

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

/// admin_gate
///
/// Route layer for `authenticated_routes`. The `RequireAdmin` extractor
/// rejects any caller whose own session is not authorized before the
/// handler runs.
async fn admin_gate(_admin: RequireAdmin, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the console API, its guards, and the observability layers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    // The cookie only carries a visitor id; the authority lives in the registry.
    let idle_secs = i64::try_from(state.config.session_idle_timeout.as_secs()).unwrap_or(i64::MAX);
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_name(registry::SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(
            tower_sessions::cookie::time::Duration::seconds(idle_secs),
        ))
        .with_secure(state.config.env == config::Env::Production)
        .with_same_site(SameSite::Strict)
        .with_http_only(true)
        .with_path("/");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                admin_gate,
            )),
        )
        // Super-admin checks happen in the handlers' extractors.
        .merge(admin::admin_routes())
        .with_state(state)
        .layer(session_layer);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Request span carrying the `x-request-id`, so every log line of one
/// request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
