use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Authenticated Router Module
///
/// Routes open to any authorized session, STORE_ADMIN or SUPER_ADMIN. The
/// router is wrapped in the admin gate layer in `create_router`, so handlers
/// here never run for anonymous, denied or still-resolving sessions.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /stores/scope
        // The store scope of the session (all stores, one store, or unassigned).
        .route("/stores/scope", get(handlers::get_store_scope))
}
