use crate::{
    AppState,
    guard::{RequireAdmin, RequireSuperAdmin},
    models::{
        ErrorBody, LoginRequest, NewProfile, ProfileEntry, RegisterRequest, RegisterResponse,
        StoreScope,
    },
    registry::Visitor,
    session::{REGISTRATION_FAILED_MESSAGE, SessionSnapshot, SessionStatus},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

// --- Session Handlers ---

/// get_session
///
/// [Public Route] The caller's session snapshot. Callers without a console
/// session are anonymous.
#[utoipa::path(
    get,
    path = "/session",
    responses((status = 200, description = "Session snapshot", body = SessionSnapshot))
)]
pub async fn get_session(visitor: Visitor) -> Json<SessionSnapshot> {
    Json(visitor.snapshot())
}

/// login
///
/// [Public Route] Credential exchange for the caller's session, answered
/// once the resolution has an outcome. 200 when authorized, 401 when the
/// credentials were rejected, 403 when the account was turned away (the
/// reason is in `authError`), 202 if the resolution outlived its timeout.
#[utoipa::path(
    post,
    path = "/session/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authorized", body = SessionSnapshot),
        (status = 202, description = "Still resolving", body = SessionSnapshot),
        (status = 401, description = "Credentials rejected", body = SessionSnapshot),
        (status = 403, description = "Account not permitted", body = SessionSnapshot)
    )
)]
pub async fn login(
    mut visitor: Visitor,
    Json(payload): Json<LoginRequest>,
) -> Result<(StatusCode, Json<SessionSnapshot>), StatusCode> {
    let authority = visitor.authority_or_open().await?;

    let Some(uid) = authority.login(&payload.email, &payload.password).await else {
        return Ok((StatusCode::UNAUTHORIZED, Json(authority.snapshot())));
    };

    let snapshot = authority.await_resolution(uid).await;
    let status = match &snapshot.status {
        SessionStatus::Authorized { .. } => StatusCode::OK,
        SessionStatus::Resolving => StatusCode::ACCEPTED,
        _ => StatusCode::FORBIDDEN,
    };
    Ok((status, Json(snapshot)))
}

/// logout
///
/// [Public Route] Ends the caller's provider session. Always succeeds.
#[utoipa::path(
    post,
    path = "/session/logout",
    responses((status = 204, description = "Signed out"))
)]
pub async fn logout(visitor: Visitor) -> StatusCode {
    if let Some(authority) = visitor.authority() {
        authority.logout().await;
    }
    StatusCode::NO_CONTENT
}

/// refresh_session
///
/// [Public Route] Refreshes the caller's provider token, which re-runs the
/// resolution.
#[utoipa::path(
    post,
    path = "/session/refresh",
    responses((status = 202, description = "Refresh requested"))
)]
pub async fn refresh_session(visitor: Visitor) -> StatusCode {
    if let Some(authority) = visitor.authority() {
        authority.refresh().await;
    }
    StatusCode::ACCEPTED
}

/// register
///
/// [Public Route] Self-registration. Creates a CUSTOMER account, which the
/// console itself will never authorize.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = RegisterResponse),
        (status = 400, description = "Rejected", body = ErrorBody)
    )
)]
pub async fn register(
    mut visitor: Visitor,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), (StatusCode, Json<ErrorBody>)> {
    let authority = visitor.authority_or_open().await.map_err(|status| {
        (
            status,
            Json(ErrorBody {
                error: REGISTRATION_FAILED_MESSAGE.to_string(),
            }),
        )
    })?;

    match authority.register(&payload.email, &payload.password).await {
        Some(entry) => Ok((
            StatusCode::CREATED,
            Json(RegisterResponse {
                uid: entry.uid,
                role: entry.profile.role,
            }),
        )),
        None => {
            let error = authority
                .snapshot()
                .auth_error
                .unwrap_or_else(|| REGISTRATION_FAILED_MESSAGE.to_string());
            Err((StatusCode::BAD_REQUEST, Json(ErrorBody { error })))
        }
    }
}

// --- Guarded Handlers ---

/// get_store_scope
///
/// [Admin Route] Which stores the session may operate on. A STORE_ADMIN
/// without a `storeId` gets `unassigned`.
#[utoipa::path(
    get,
    path = "/stores/scope",
    responses((status = 200, description = "Store scope", body = StoreScope))
)]
pub async fn get_store_scope(RequireAdmin(session): RequireAdmin) -> Json<StoreScope> {
    Json(session.scope)
}

/// list_users
///
/// [Super Admin Route] Every profile record, for the user-management screen.
#[utoipa::path(
    get,
    path = "/users",
    responses((status = 200, description = "Profiles", body = [ProfileEntry]))
)]
pub async fn list_users(
    RequireSuperAdmin(_admin): RequireSuperAdmin,
    State(state): State<AppState>,
) -> Result<Json<Vec<ProfileEntry>>, StatusCode> {
    state.repo.list_profiles().await.map(Json).map_err(|e| {
        tracing::error!("list_profiles error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// assign_profile
///
/// [Super Admin Route] Create-or-replace of a profile record. The role must
/// be one of the known roles; a STORE_ADMIN without `storeId` is accepted
/// and shows up as unassigned.
#[utoipa::path(
    put,
    path = "/users/{uid}",
    params(("uid" = Uuid, Path, description = "Identity handle")),
    request_body = NewProfile,
    responses(
        (status = 200, description = "Stored", body = ProfileEntry),
        (status = 422, description = "Unknown role", body = ErrorBody)
    )
)]
pub async fn assign_profile(
    RequireSuperAdmin(admin): RequireSuperAdmin,
    State(state): State<AppState>,
    Path(uid): Path<Uuid>,
    Json(payload): Json<NewProfile>,
) -> Result<Json<ProfileEntry>, (StatusCode, Json<ErrorBody>)> {
    if !payload.has_known_role() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorBody {
                error: format!("unknown role {:?}", payload.role),
            }),
        ));
    }

    let profile = payload.normalized();
    match state.repo.put_profile(uid, profile).await {
        Ok(profile) => {
            tracing::info!(admin = %admin.uid, %uid, role = %profile.role, "profile assigned");
            Ok(Json(ProfileEntry { uid, profile }))
        }
        Err(e) => {
            tracing::error!("put_profile error: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "failed to store profile".to_string(),
                }),
            ))
        }
    }
}
