use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use uuid::Uuid;

use crate::{
    models::{AdminRole, StoreScope},
    registry::{RegistryState, Visitor},
    session::{SessionSnapshot, SessionStatus},
};

/// Entry screen for anonymous visitors.
pub const LOGIN_PATH: &str = "/";
/// Landing screen for store-scoped administrators.
pub const STORE_LANDING_PATH: &str = "/stores";

/// Access
///
/// The privilege a screen or endpoint requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    AnyAdmin,
    SuperAdminOnly,
}

/// GuardDecision
///
/// What a privileged screen does with the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Resolution in flight: show a neutral loading indicator, touch no data.
    Loading,
    RedirectToLogin,
    RedirectToStoreLanding,
    Render(AdminRole),
}

/// evaluate
///
/// The page-guard rule. Denied is treated like Anonymous: it is a momentary
/// state that is about to be followed by a sign-out.
pub fn evaluate(snapshot: &SessionSnapshot, access: Access) -> GuardDecision {
    match (&snapshot.status, access) {
        (SessionStatus::Resolving, _) => GuardDecision::Loading,
        (SessionStatus::Anonymous | SessionStatus::Denied { .. }, _) => {
            GuardDecision::RedirectToLogin
        }
        (
            SessionStatus::Authorized {
                role: AdminRole::StoreAdmin,
                ..
            },
            Access::SuperAdminOnly,
        ) => GuardDecision::RedirectToStoreLanding,
        (SessionStatus::Authorized { role, .. }, _) => GuardDecision::Render(*role),
    }
}

/// AdminSession
///
/// The authorized session handed to guarded handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSession {
    pub uid: Uuid,
    pub role: AdminRole,
    pub scope: StoreScope,
}

/// GuardRejection
///
/// A guard decision other than `Render`. Browser navigations (Accept:
/// text/html) are redirected; API calls get a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardRejection {
    pub decision: GuardDecision,
    pub wants_html: bool,
}

impl IntoResponse for GuardRejection {
    fn into_response(self) -> Response {
        match (self.decision, self.wants_html) {
            (GuardDecision::RedirectToLogin, true) => Redirect::to(LOGIN_PATH).into_response(),
            (GuardDecision::RedirectToStoreLanding, true) => {
                Redirect::to(STORE_LANDING_PATH).into_response()
            }
            (GuardDecision::RedirectToLogin, false) => StatusCode::UNAUTHORIZED.into_response(),
            (GuardDecision::RedirectToStoreLanding, false) => {
                StatusCode::FORBIDDEN.into_response()
            }
            // Loading, and the unreachable Render, ask the client to retry.
            (GuardDecision::Loading | GuardDecision::Render(_), _) => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, HeaderValue::from_static("1"))],
            )
                .into_response(),
        }
    }
}

/// admit
///
/// Runs the guard and builds the `AdminSession` for a `Render` decision.
pub fn admit(
    snapshot: &SessionSnapshot,
    access: Access,
    wants_html: bool,
) -> Result<AdminSession, GuardRejection> {
    let reject = |decision| GuardRejection {
        decision,
        wants_html,
    };

    match evaluate(snapshot, access) {
        GuardDecision::Render(role) => {
            let uid = snapshot
                .uid()
                .ok_or_else(|| reject(GuardDecision::RedirectToLogin))?;
            let scope = snapshot
                .store_scope()
                .ok_or_else(|| reject(GuardDecision::RedirectToLogin))?;
            Ok(AdminSession { uid, role, scope })
        }
        decision => Err(reject(decision)),
    }
}

fn wants_html(parts: &Parts) -> bool {
    parts
        .headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

/// RequireAdmin
///
/// Extractor admitting the caller when its own session is authorized
/// (STORE_ADMIN or SUPER_ADMIN).
pub struct RequireAdmin(pub AdminSession);

/// RequireSuperAdmin
///
/// Extractor admitting SUPER_ADMIN only; STORE_ADMIN is sent to the store
/// landing screen.
pub struct RequireSuperAdmin(pub AdminSession);

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
    RegistryState: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let visitor = Visitor::from_request_parts(parts, state).await?;
        admit(&visitor.snapshot(), Access::AnyAdmin, wants_html(parts))
            .map(Self)
            .map_err(IntoResponse::into_response)
    }
}

impl<S> FromRequestParts<S> for RequireSuperAdmin
where
    S: Send + Sync,
    RegistryState: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let visitor = Visitor::from_request_parts(parts, state).await?;
        admit(&visitor.snapshot(), Access::SuperAdminOnly, wants_html(parts))
            .map(Self)
            .map_err(IntoResponse::into_response)
    }
}
