use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Validation, decode};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    models::{Identity, IdentityNotification},
};

/// Buffered identity notifications per subscriber before it starts lagging.
const NOTIFICATION_CAPACITY: usize = 32;

/// Errors raised by the auth provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("unknown account")]
    UnknownAccount,

    #[error("account already exists")]
    AccountExists,

    #[error("no active session")]
    NoSession,

    #[error("auth provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("auth provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("access token failed verification: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("access token subject does not match the returned user")]
    SubjectMismatch,
}

impl ProviderError {
    /// Bad credentials or unknown account. These are reported to the visitor
    /// with the same sanitized message.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Self::InvalidCredentials | Self::UnknownAccount)
    }
}

/// IdentityProvider Trait
///
/// The auth-provider boundary. Implementations own the provider session and
/// push an `IdentityNotification` to every subscriber whenever it changes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// New receiver for identity-change notifications.
    fn subscribe(&self) -> broadcast::Receiver<IdentityNotification>;

    /// The identity of the current provider session, if any.
    fn current_identity(&self) -> Option<Identity>;

    /// Credential exchange. Emits `Some(identity)` on success.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, ProviderError>;

    /// Creates a credential. Does not start a session and emits nothing.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, ProviderError>;

    /// Exchanges the refresh token. Emits `Some(identity)` on success.
    async fn refresh_session(&self) -> Result<Identity, ProviderError>;

    /// Ends the session. The local session is dropped at once and `None` is
    /// emitted even when the remote call fails, unless a newer session was
    /// started while the call was in flight.
    async fn sign_out(&self) -> Result<(), ProviderError>;
}

/// ProviderState
///
/// The concrete type used to share one provider session.
pub type ProviderState = Arc<dyn IdentityProvider>;

/// IdentityProviderFactory Trait
///
/// Opens independent provider sessions, one per console visitor. A sign-in
/// in one session is never visible in another.
pub trait IdentityProviderFactory: Send + Sync {
    fn open_session(&self) -> ProviderState;
}

/// ProviderFactoryState
///
/// The concrete type used to share the provider factory across the application.
pub type ProviderFactoryState = Arc<dyn IdentityProviderFactory>;

/// Claims
///
/// The subset of the provider's access-token payload the console relies on.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the identity handle, also the profile key.
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
    #[serde(default)]
    pub email: Option<String>,
}

// --- Wire payloads (GoTrue REST API) ---

#[derive(Deserialize)]
struct UserPayload {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: UserPayload,
}

/// Signup answers with the bare user, or with a session wrapping it when
/// email confirmation is disabled.
#[derive(Deserialize)]
struct SignupResponse {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user: Option<UserPayload>,
}

#[derive(Deserialize, Default)]
struct ErrorPayload {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

/// Maps a non-success provider answer onto the error taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> ProviderError {
    let payload: ErrorPayload = serde_json::from_str(body).unwrap_or_default();
    let code = payload
        .error_code
        .as_deref()
        .or(payload.error.as_deref())
        .unwrap_or_default();

    match code {
        "invalid_grant" | "invalid_credentials" => ProviderError::InvalidCredentials,
        "user_not_found" => ProviderError::UnknownAccount,
        "user_already_exists" | "email_exists" => ProviderError::AccountExists,
        _ => ProviderError::Rejected {
            status: status.as_u16(),
            message: payload
                .msg
                .or(payload.error_description)
                .unwrap_or_else(|| code.to_string()),
        },
    }
}

// --- Session slot ---

#[derive(Default)]
struct SlotState {
    identity: Option<Identity>,
    epoch: u64,
}

/// SessionSlot
///
/// One provider session and its notification stream. Every change of the
/// session bumps the epoch. Notifications are sent under the slot lock, so
/// subscribers see them in epoch order.
struct SessionSlot {
    state: Mutex<SlotState>,
    notifications: broadcast::Sender<IdentityNotification>,
}

impl Default for SessionSlot {
    fn default() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            state: Mutex::new(SlotState::default()),
            notifications,
        }
    }
}

impl SessionSlot {
    fn subscribe(&self) -> broadcast::Receiver<IdentityNotification> {
        self.notifications.subscribe()
    }

    fn current(&self) -> Option<Identity> {
        self.state.lock().identity.clone()
    }

    fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    fn start(&self, identity: Identity) {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.identity = Some(identity.clone());
        let _ = self.notifications.send(Some(identity));
    }

    /// Replaces the session only if nothing changed since `epoch`.
    fn replace_if(&self, epoch: u64, identity: Identity) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return false;
        }
        state.epoch += 1;
        state.identity = Some(identity.clone());
        let _ = self.notifications.send(Some(identity));
        true
    }

    /// Drops the session locally. Returns it with the epoch of the drop.
    fn take(&self) -> (Option<Identity>, u64) {
        let mut state = self.state.lock();
        state.epoch += 1;
        (state.identity.take(), state.epoch)
    }

    /// Announces the absence, unless a newer session started after the drop
    /// at `epoch`.
    fn announce_end(&self, epoch: u64) -> bool {
        let state = self.state.lock();
        if state.epoch != epoch {
            return false;
        }
        let _ = self.notifications.send(None);
        true
    }
}

// --- Supabase (GoTrue) client ---

struct GoTrueApi {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl GoTrueApi {
    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    /// Verifies the access token and checks its subject against the user
    /// the provider returned alongside it.
    fn identity_from_tokens(&self, response: TokenResponse) -> Result<Identity, ProviderError> {
        let token_data = decode::<Claims>(
            &response.access_token,
            &self.decoding_key,
            &self.validation,
        )?;

        if token_data.claims.sub != response.user.id {
            return Err(ProviderError::SubjectMismatch);
        }

        Ok(Identity {
            uid: token_data.claims.sub,
            email: response.user.email.or(token_data.claims.email),
            access_token: response.access_token,
            refresh_token: response.refresh_token,
        })
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<Identity, ProviderError> {
        let response = self
            .http
            .post(self.endpoint("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let tokens = response.json::<TokenResponse>().await?;
        self.identity_from_tokens(tokens)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, ProviderError> {
        let response = self
            .http
            .post(self.endpoint("signup"))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let created = response.json::<SignupResponse>().await?;
        let (uid, created_email) = match (created.user, created.id) {
            (Some(user), _) => (user.id, user.email),
            (None, Some(id)) => (id, created.email),
            (None, None) => {
                return Err(ProviderError::Rejected {
                    status: status.as_u16(),
                    message: "signup response carried no user id".to_string(),
                });
            }
        };

        // Registration never signs the new account in.
        Ok(Identity {
            uid,
            email: created_email.or_else(|| Some(email.to_string())),
            access_token: String::new(),
            refresh_token: None,
        })
    }

    async fn logout(&self, access_token: &str) -> Result<(), ProviderError> {
        let response = self
            .http
            .post(self.endpoint("logout"))
            .header("apikey", &self.api_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }
}

/// SupabaseAuthClient
///
/// Opens `SupabaseSession`s against the Supabase (GoTrue) auth REST API.
/// Access tokens are verified against the project's JWT secret before the
/// identity handle is trusted.
#[derive(Clone)]
pub struct SupabaseAuthClient {
    api: Arc<GoTrueApi>,
}

impl SupabaseAuthClient {
    pub fn new(config: &AppConfig) -> Self {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.set_audience(&[config.jwt_audience.as_str()]);

        Self {
            api: Arc::new(GoTrueApi {
                http: reqwest::Client::new(),
                base_url: config.auth_url.trim_end_matches('/').to_string(),
                api_key: config.auth_api_key.clone(),
                decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
                validation,
            }),
        }
    }

    pub fn session(&self) -> SupabaseSession {
        SupabaseSession {
            api: Arc::clone(&self.api),
            slot: SessionSlot::default(),
        }
    }
}

impl IdentityProviderFactory for SupabaseAuthClient {
    fn open_session(&self) -> ProviderState {
        Arc::new(self.session())
    }
}

/// SupabaseSession
///
/// One visitor's provider session.
pub struct SupabaseSession {
    api: Arc<GoTrueApi>,
    slot: SessionSlot,
}

#[async_trait]
impl IdentityProvider for SupabaseSession {
    fn subscribe(&self) -> broadcast::Receiver<IdentityNotification> {
        self.slot.subscribe()
    }

    fn current_identity(&self) -> Option<Identity> {
        self.slot.current()
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, ProviderError> {
        let identity = self
            .api
            .token_grant(
                "password",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await?;
        self.slot.start(identity.clone());
        Ok(identity)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, ProviderError> {
        self.api.sign_up(email, password).await
    }

    async fn refresh_session(&self) -> Result<Identity, ProviderError> {
        let epoch = self.slot.epoch();
        let refresh_token = self
            .slot
            .current()
            .and_then(|identity| identity.refresh_token)
            .ok_or(ProviderError::NoSession)?;

        let identity = self
            .api
            .token_grant(
                "refresh_token",
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await?;

        // A sign-out or a new sign-in during the exchange wins over it.
        if !self.slot.replace_if(epoch, identity.clone()) {
            return Err(ProviderError::NoSession);
        }
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let (previous, epoch) = self.slot.take();

        let result = match previous {
            Some(identity) if !identity.access_token.is_empty() => {
                self.api.logout(&identity.access_token).await
            }
            _ => Ok(()),
        };

        if !self.slot.announce_end(epoch) {
            tracing::debug!("a newer session started during sign-out; absence not announced");
        }
        result
    }
}

// --- Mock Implementation (tests and local runs) ---

struct MockAccount {
    uid: Uuid,
    password: String,
}

#[derive(Default)]
struct MockDirectory {
    accounts: Mutex<HashMap<String, MockAccount>>,
    sign_out_calls: AtomicUsize,
    sign_out_latency: Mutex<Option<Duration>>,
    unavailable: AtomicBool,
}

/// MockIdentityProvider
///
/// In-memory `IdentityProvider` with the same notification behavior as the
/// real client. It is also a factory: sessions opened from it share its
/// accounts, its availability switch and its sign-out counter.
#[derive(Default)]
pub struct MockIdentityProvider {
    directory: Arc<MockDirectory>,
    slot: SessionSlot,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a credential and returns its identity handle.
    pub fn add_account(&self, email: &str, password: &str) -> Uuid {
        let uid = Uuid::new_v4();
        self.directory.accounts.lock().insert(
            email.to_string(),
            MockAccount {
                uid,
                password: password.to_string(),
            },
        );
        uid
    }

    /// When set, every provider call fails as if the service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.directory
            .unavailable
            .store(unavailable, Ordering::SeqCst);
    }

    /// Simulated round trip of the remote logout call.
    pub fn set_sign_out_latency(&self, latency: Option<Duration>) {
        *self.directory.sign_out_latency.lock() = latency;
    }

    /// Sign-out calls across every session opened from this provider.
    pub fn sign_out_calls(&self) -> usize {
        self.directory.sign_out_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), ProviderError> {
        if self.directory.unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                status: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
                message: "mock provider unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl IdentityProviderFactory for MockIdentityProvider {
    fn open_session(&self) -> ProviderState {
        Arc::new(Self {
            directory: Arc::clone(&self.directory),
            slot: SessionSlot::default(),
        })
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    fn subscribe(&self) -> broadcast::Receiver<IdentityNotification> {
        self.slot.subscribe()
    }

    fn current_identity(&self) -> Option<Identity> {
        self.slot.current()
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, ProviderError> {
        self.check_available()?;

        let uid = {
            let accounts = self.directory.accounts.lock();
            let account = accounts.get(email).ok_or(ProviderError::UnknownAccount)?;
            if account.password != password {
                return Err(ProviderError::InvalidCredentials);
            }
            account.uid
        };

        let identity = Identity::bare(uid, email);
        self.slot.start(identity.clone());
        Ok(identity)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, ProviderError> {
        self.check_available()?;

        if self.directory.accounts.lock().contains_key(email) {
            return Err(ProviderError::AccountExists);
        }
        let uid = self.add_account(email, password);
        Ok(Identity::bare(uid, email))
    }

    async fn refresh_session(&self) -> Result<Identity, ProviderError> {
        self.check_available()?;

        let epoch = self.slot.epoch();
        let identity = self.current_identity().ok_or(ProviderError::NoSession)?;
        if !self.slot.replace_if(epoch, identity.clone()) {
            return Err(ProviderError::NoSession);
        }
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.directory.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        let (_, epoch) = self.slot.take();

        let latency = *self.directory.sign_out_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let result = self.check_available();
        self.slot.announce_end(epoch);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_gotrue_credential_errors() {
        let err = classify_failure(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        assert!(matches!(err, ProviderError::InvalidCredentials));

        let err = classify_failure(
            StatusCode::BAD_REQUEST,
            r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#,
        );
        assert!(err.is_credential_failure());
    }

    #[test]
    fn classifies_signup_conflict_and_unknown_bodies() {
        let err = classify_failure(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"code":422,"error_code":"user_already_exists","msg":"User already registered"}"#,
        );
        assert!(matches!(err, ProviderError::AccountExists));

        match classify_failure(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>") {
            ProviderError::Rejected { status, .. } => assert_eq!(status, 502),
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn late_end_of_a_replaced_session_is_not_announced() {
        let slot = SessionSlot::default();
        let mut notifications = slot.subscribe();

        slot.start(Identity::bare(Uuid::from_u128(1), "a@x.com"));
        let (previous, epoch) = slot.take();
        assert_eq!(previous.map(|identity| identity.uid), Some(Uuid::from_u128(1)));

        // A new sign-in lands while the remote logout is still running.
        slot.start(Identity::bare(Uuid::from_u128(2), "b@x.com"));
        assert!(!slot.announce_end(epoch));

        assert_eq!(slot.current().map(|identity| identity.uid), Some(Uuid::from_u128(2)));
        let first = notifications.try_recv().unwrap();
        let second = notifications.try_recv().unwrap();
        assert_eq!(first.map(|identity| identity.uid), Some(Uuid::from_u128(1)));
        assert_eq!(second.map(|identity| identity.uid), Some(Uuid::from_u128(2)));
        assert!(notifications.try_recv().is_err());
    }

    #[test]
    fn refresh_loses_to_a_sign_out_during_the_exchange() {
        let slot = SessionSlot::default();
        slot.start(Identity::bare(Uuid::from_u128(1), "a@x.com"));
        let epoch = slot.epoch();

        let (_, end_epoch) = slot.take();
        assert!(slot.announce_end(end_epoch));
        assert!(!slot.replace_if(epoch, Identity::bare(Uuid::from_u128(1), "a@x.com")));
        assert!(slot.current().is_none());
    }
}
