use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without an authorized session: the health probe and
/// everything the login screen needs.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        .route("/health", get(|| async { "ok" }))
        // GET /session
        // The published session snapshot; the dashboard polls it while resolving.
        .route("/session", get(handlers::get_session))
        // POST /session/login
        .route("/session/login", post(handlers::login))
        // POST /session/logout
        .route("/session/logout", post(handlers::logout))
        // POST /session/refresh
        .route("/session/refresh", post(handlers::refresh_session))
        // POST /register
        // Self-registration. Produces a CUSTOMER account only.
        .route("/register", post(handlers::register))
}
