use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, put},
};

/// Admin Router Module
///
/// User management, restricted to SUPER_ADMIN. Each handler takes the
/// `RequireSuperAdmin` extractor; a STORE_ADMIN is sent to the store landing
/// screen instead.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /users
        .route("/users", get(handlers::list_users))
        // PUT /users/{uid}
        // Create-or-replace of a profile record. Deletion is not offered.
        .route("/users/{uid}", put(handlers::assign_profile))
}
