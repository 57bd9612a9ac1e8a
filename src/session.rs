use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    models::{AdminRole, StoreScope},
    provider::ProviderError,
    repository::RepositoryError,
};

/// Sanitized login failure. Never says which of email or password was wrong.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "invalid email or password";
pub const LOGIN_FAILED_MESSAGE: &str = "an error occurred while signing in";
pub const ACCOUNT_EXISTS_MESSAGE: &str = "an account with this email already exists";
pub const REGISTRATION_FAILED_MESSAGE: &str = "registration failed";

/// DenialReason
///
/// Why a signed-in identity was turned away. The display strings are what
/// the login screen shows after the forced sign-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum DenialReason {
    /// The profile exists but its role is not an admin role.
    NotPermitted,
    /// No profile, and the store is not empty so bootstrap does not apply.
    ProfileNotFound,
    /// A data-access fault while checking the profile.
    VerificationFailed,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotPermitted => "not permitted",
            Self::ProfileNotFound => "profile not found",
            Self::VerificationFailed => "error verifying permissions",
        })
    }
}

/// SessionStatus
///
/// The resolution state of the current visitor. Every identity notification
/// restarts at `Resolving`; the other states are terminal for that
/// notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
#[ts(export)]
pub enum SessionStatus {
    Resolving,
    Anonymous,
    /// Momentary: a forced sign-out is already in flight and the next
    /// notification will be an absence.
    Denied { reason: DenialReason },
    Authorized {
        uid: Uuid,
        email: Option<String>,
        role: AdminRole,
        #[serde(rename = "storeId")]
        store_id: Option<String>,
    },
}

/// SessionSnapshot
///
/// The value published by the session authority to every guard and screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    /// Displayable message for the login screen: a sanitized login failure
    /// or the reason of the last denial.
    pub auth_error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::Resolving,
            auth_error: None,
        }
    }
}

impl SessionSnapshot {
    /// What a visitor without a console session sees.
    pub fn anonymous() -> Self {
        Self {
            status: SessionStatus::Anonymous,
            auth_error: None,
        }
    }

    pub fn role(&self) -> Option<AdminRole> {
        match &self.status {
            SessionStatus::Authorized { role, .. } => Some(*role),
            _ => None,
        }
    }

    pub fn uid(&self) -> Option<Uuid> {
        match &self.status {
            SessionStatus::Authorized { uid, .. } => Some(*uid),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == SessionStatus::Resolving
    }

    pub fn is_super_admin(&self) -> bool {
        self.role() == Some(AdminRole::SuperAdmin)
    }

    pub fn store_scope(&self) -> Option<StoreScope> {
        match &self.status {
            SessionStatus::Authorized { role, store_id, .. } => {
                Some(StoreScope::for_role(*role, store_id.as_deref()))
            }
            _ => None,
        }
    }

    /// Where the login screen sends an authorized session.
    pub fn landing_path(&self) -> Option<&'static str> {
        self.role().map(landing_path)
    }
}

pub fn landing_path(role: AdminRole) -> &'static str {
    match role {
        AdminRole::SuperAdmin => "/users",
        AdminRole::StoreAdmin => "/stores",
    }
}

/// ResolutionError
///
/// Everything that can go wrong while resolving a visitor. None of these
/// leave the authority: each is reduced to an `auth_error` string or a
/// transition to `Denied`.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// Credential exchange rejected by the provider.
    #[error("provider rejected the credentials: {0}")]
    ProviderAuthFailure(#[source] ProviderError),

    #[error("no profile for identity {0}")]
    ProfileNotFound(Uuid),

    #[error("profile role {role:?} does not grant console access")]
    ProfileRoleInvalid { role: String },

    #[error("data access fault: {0}")]
    DataAccessFault(#[from] RepositoryError),
}

impl ResolutionError {
    /// The denial a failed resolution maps onto. Provider failures never
    /// reach a resolution, so they are treated as a verification failure.
    pub fn denial_reason(&self) -> DenialReason {
        match self {
            Self::ProfileNotFound(_) => DenialReason::ProfileNotFound,
            Self::ProfileRoleInvalid { .. } => DenialReason::NotPermitted,
            Self::DataAccessFault(_) | Self::ProviderAuthFailure(_) => {
                DenialReason::VerificationFailed
            }
        }
    }
}
