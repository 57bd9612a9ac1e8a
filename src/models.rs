use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Role Vocabulary ---

/// Raw role strings as stored in the `profiles` collection.
pub mod profile_role {
    pub const SUPER_ADMIN: &str = "SUPER_ADMIN";
    pub const STORE_ADMIN: &str = "STORE_ADMIN";
    /// Self-registered accounts. Never authorized to use the console.
    pub const CUSTOMER: &str = "CUSTOMER";

    /// Every role value the console itself will write.
    pub const KNOWN: [&str; 3] = [SUPER_ADMIN, STORE_ADMIN, CUSTOMER];
}

/// AdminRole
///
/// The two roles that pass the console's authorization gate. Anything else
/// found in a profile record (including `CUSTOMER`) is not an `AdminRole`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum AdminRole {
    SuperAdmin,
    StoreAdmin,
}

impl AdminRole {
    /// Maps a stored role string onto an authorizing role. Matching is exact:
    /// `"super_admin"` or `" SUPER_ADMIN"` do not authorize.
    pub fn from_profile_role(role: &str) -> Option<Self> {
        match role {
            profile_role::SUPER_ADMIN => Some(Self::SuperAdmin),
            profile_role::STORE_ADMIN => Some(Self::StoreAdmin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => profile_role::SUPER_ADMIN,
            Self::StoreAdmin => profile_role::STORE_ADMIN,
        }
    }
}

impl fmt::Display for AdminRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Identity ---

/// Identity
///
/// The auth provider's view of a signed-in visitor. `uid` is the identity
/// handle and doubles as the key of the visitor's profile record.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: Uuid,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl Identity {
    /// Identity without provider tokens. Used by the mock provider and tests.
    pub fn bare(uid: Uuid, email: impl Into<String>) -> Self {
        Self {
            uid,
            email: Some(email.into()),
            access_token: String::new(),
            refresh_token: None,
        }
    }
}

// Tokens are redacted so an identity can be logged with `?identity`.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("uid", &self.uid)
            .field("email", &self.email)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// One push from the provider's identity-change stream: a handle, or an
/// explicit absence.
pub type IdentityNotification = Option<Identity>;

// --- Profile Records ---

/// Profile
///
/// The authorization-relevant record stored in `public.profiles`, keyed by
/// the identity handle. `role` is kept as the raw string so unrecognized
/// values survive a read and can be reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Profile {
    pub email: String,
    // Older records were written without a display name.
    #[serde(default)]
    pub name: Option<String>,
    pub role: String,
    // Required for STORE_ADMIN, absent otherwise. Not enforced here.
    #[serde(default)]
    pub store_id: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn admin_role(&self) -> Option<AdminRole> {
        AdminRole::from_profile_role(&self.role)
    }
}

/// NewProfile
///
/// Write payload for a create-or-replace of a profile record. `created_at`
/// is assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct NewProfile {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub role: String,
    #[serde(default)]
    pub store_id: Option<String>,
}

impl NewProfile {
    /// The record written by the first-user bootstrap rule.
    pub fn bootstrap_super_admin(email: Option<&str>) -> Self {
        Self {
            email: email.unwrap_or_default().to_string(),
            name: None,
            role: profile_role::SUPER_ADMIN.to_string(),
            store_id: None,
        }
    }

    /// Drops a `storeId` on any role other than STORE_ADMIN.
    pub fn normalized(mut self) -> Self {
        if self.role != profile_role::STORE_ADMIN {
            self.store_id = None;
        }
        self
    }

    pub fn has_known_role(&self) -> bool {
        profile_role::KNOWN.contains(&self.role.as_str())
    }

    /// The record written by self-registration.
    pub fn customer(email: &str) -> Self {
        Self {
            email: email.to_string(),
            name: None,
            role: profile_role::CUSTOMER.to_string(),
            store_id: None,
        }
    }
}

/// ProfileEntry
///
/// A profile together with its key, as listed on the user-management screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProfileEntry {
    #[sqlx(rename = "id")]
    pub uid: Uuid,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub profile: Profile,
}

/// StoreScope
///
/// Which stores an authorized session may operate on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(tag = "scope", rename_all = "camelCase")]
#[ts(export)]
pub enum StoreScope {
    AllStores,
    Store {
        #[serde(rename = "storeId")]
        store_id: String,
    },
    /// A STORE_ADMIN whose profile carries no `storeId`.
    Unassigned,
}

impl StoreScope {
    pub fn for_role(role: AdminRole, store_id: Option<&str>) -> Self {
        match (role, store_id) {
            (AdminRole::SuperAdmin, _) => Self::AllStores,
            (AdminRole::StoreAdmin, Some(id)) if !id.is_empty() => Self::Store {
                store_id: id.to_string(),
            },
            (AdminRole::StoreAdmin, _) => Self::Unassigned,
        }
    }
}

// --- Request Payloads ---

/// LoginRequest
///
/// Credentials for `POST /session/login`. Passed straight to the auth
/// provider; never persisted or logged.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// RegisterRequest
///
/// Payload for `POST /register`. The resulting profile is always CUSTOMER.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

/// RegisterResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterResponse {
    pub uid: Uuid,
    pub role: String,
}

/// ErrorBody
///
/// JSON error payload returned by the console API.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ErrorBody {
    pub error: String,
}
