//! Session authority: resolves the current visitor into
//! anonymous / denied / store-admin / super-admin and publishes the result.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    models::{AdminRole, Identity, IdentityNotification, NewProfile, Profile, ProfileEntry},
    provider::{ProviderError, ProviderState},
    repository::{RepositoryError, RepositoryState},
    session::{
        ACCOUNT_EXISTS_MESSAGE, INVALID_CREDENTIALS_MESSAGE, LOGIN_FAILED_MESSAGE,
        REGISTRATION_FAILED_MESSAGE, ResolutionError, SessionSnapshot, SessionStatus,
    },
};

/// SessionAuthority
///
/// The gate every screen of one visitor consults. The registry constructs
/// one per visitor session and shares it by `Arc`; there is no global
/// instance.
///
/// Each identity notification gets a generation token. A resolution only
/// commits its outcome (and only issues a forced sign-out) while its token
/// is still the latest, so a slow answer for an earlier identity can never
/// overwrite a newer one.
pub struct SessionAuthority {
    provider: ProviderState,
    repo: RepositoryState,
    resolve_timeout: Duration,
    generation: AtomicU64,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl SessionAuthority {
    pub fn new(provider: ProviderState, repo: RepositoryState, resolve_timeout: Duration) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            provider,
            repo,
            resolve_timeout,
            generation: AtomicU64::new(0),
            snapshot,
        }
    }

    // --- Published state ---

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Waits until the current resolution (if any) has finished.
    pub async fn settled(&self) -> SessionSnapshot {
        let mut receiver = self.snapshot.subscribe();
        match receiver.wait_for(|snapshot| !snapshot.is_loading()).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }

    // --- Notification intake ---

    /// spawn
    ///
    /// Subscribes to the provider, replays its current identity, then feeds
    /// every later notification into the state machine. Each resolution runs
    /// as its own task so a hung request never blocks a newer notification.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        // Subscribe before reading the current identity so nothing is missed.
        let mut notifications = self.provider.subscribe();
        let initial = self.provider.current_identity();
        let authority = Arc::clone(self);

        tokio::spawn(async move {
            authority.dispatch(initial);
            loop {
                match notifications.recv().await {
                    Ok(notification) => authority.dispatch(notification),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "identity notifications lagged; re-syncing");
                        authority.dispatch(authority.provider.current_identity());
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("identity notification stream closed");
                        break;
                    }
                }
            }
        })
    }

    fn dispatch(self: &Arc<Self>, notification: IdentityNotification) {
        match notification {
            None => self.settle_anonymous(),
            Some(identity) => {
                // The token is taken here, in arrival order, not inside the task.
                let token = self.begin_resolution(&identity);
                let authority = Arc::clone(self);
                tokio::spawn(async move { authority.resolve(token, identity).await });
            }
        }
    }

    /// handle_notification
    ///
    /// Runs one notification to completion on the caller's task.
    pub async fn handle_notification(&self, notification: IdentityNotification) {
        match notification {
            None => self.settle_anonymous(),
            Some(identity) => {
                let token = self.begin_resolution(&identity);
                self.resolve(token, identity).await;
            }
        }
    }

    // --- Transitions ---

    /// Absence: Anonymous at once, no data access. A denial reason on
    /// display survives so the login screen can still show it.
    fn settle_anonymous(&self) {
        self.snapshot.send_modify(|snapshot| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            if !matches!(snapshot.status, SessionStatus::Denied { .. }) {
                snapshot.auth_error = None;
            }
            snapshot.status = SessionStatus::Anonymous;
        });
        tracing::info!("session anonymous");
    }

    fn begin_resolution(&self, identity: &Identity) -> u64 {
        let mut token = 0;
        self.snapshot.send_modify(|snapshot| {
            token = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            snapshot.status = SessionStatus::Resolving;
        });
        tracing::debug!(uid = %identity.uid, token, "resolving identity");
        token
    }

    /// Commits `status` if `token` is still the latest generation.
    fn commit(&self, token: u64, status: SessionStatus, auth_error: Option<String>) -> bool {
        self.snapshot.send_if_modified(|snapshot| {
            if self.generation.load(Ordering::SeqCst) != token {
                return false;
            }
            snapshot.status = status;
            snapshot.auth_error = auth_error;
            true
        })
    }

    async fn resolve(&self, token: u64, identity: Identity) {
        let outcome = match tokio::time::timeout(self.resolve_timeout, self.authorize(&identity)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ResolutionError::DataAccessFault(RepositoryError::Timeout(
                self.resolve_timeout,
            ))),
        };

        match outcome {
            Ok((role, profile)) => {
                let status = SessionStatus::Authorized {
                    uid: identity.uid,
                    email: identity.email.clone(),
                    role,
                    store_id: profile.store_id,
                };
                if self.commit(token, status, None) {
                    tracing::info!(uid = %identity.uid, %role, "session authorized");
                } else {
                    tracing::debug!(uid = %identity.uid, token, "discarding stale authorization");
                }
            }
            Err(error) => {
                let reason = error.denial_reason();
                let status = SessionStatus::Denied { reason };
                if !self.commit(token, status, Some(reason.to_string())) {
                    tracing::debug!(uid = %identity.uid, token, "discarding stale denial");
                    return;
                }

                match &error {
                    ResolutionError::DataAccessFault(_) => {
                        tracing::error!(uid = %identity.uid, %error, "error verifying permissions")
                    }
                    _ => tracing::warn!(uid = %identity.uid, %error, %reason, "session denied"),
                }
                self.force_sign_out(token).await;
            }
        }
    }

    /// The profile lookup and role check, bootstrap included.
    async fn authorize(&self, identity: &Identity) -> Result<(AdminRole, Profile), ResolutionError> {
        let profile = match self.repo.get_profile(identity.uid).await? {
            Some(profile) => profile,
            None => self.bootstrap(identity).await?,
        };

        let role = profile
            .admin_role()
            .ok_or_else(|| ResolutionError::ProfileRoleInvalid {
                role: profile.role.clone(),
            })?;

        Ok((role, profile))
    }

    /// bootstrap
    ///
    /// First-user rule: when the profile collection is empty, the first
    /// identity to sign in becomes SUPER_ADMIN. A non-empty collection never
    /// promotes anyone. The write goes through the store's atomic
    /// `create_if_empty`, so of two simultaneous first sign-ins only one wins.
    async fn bootstrap(&self, identity: &Identity) -> Result<Profile, ResolutionError> {
        let existing = self.repo.probe_profiles(1).await?;
        if !existing.is_empty() {
            return Err(ResolutionError::ProfileNotFound(identity.uid));
        }

        let seed = NewProfile::bootstrap_super_admin(identity.email.as_deref());
        if !self.repo.create_if_empty(identity.uid, seed).await? {
            tracing::warn!(uid = %identity.uid, "bootstrap lost to a concurrent first sign-in");
            return Err(ResolutionError::ProfileNotFound(identity.uid));
        }
        tracing::info!(uid = %identity.uid, "empty profile store: first identity promoted to SUPER_ADMIN");

        self.repo
            .get_profile(identity.uid)
            .await?
            .ok_or(ResolutionError::ProfileNotFound(identity.uid))
    }

    /// Signs out the identity a denial was committed for. Skipped once a
    /// newer notification has superseded that denial.
    async fn force_sign_out(&self, token: u64) {
        if self.generation.load(Ordering::SeqCst) != token {
            tracing::debug!(token, "denial superseded; forced sign-out skipped");
            return;
        }
        if let Err(error) = self.provider.sign_out().await {
            tracing::warn!(%error, "forced sign-out failed at the provider; local session dropped");
        }
    }

    fn set_auth_error(&self, auth_error: Option<&str>) {
        self.snapshot.send_modify(|snapshot| {
            snapshot.auth_error = auth_error.map(str::to_string);
        });
    }

    // --- Operations ---

    /// login
    ///
    /// Credential exchange. Never fails towards the caller: on failure the
    /// state stays as it was, `auth_error` carries a sanitized message and
    /// `None` is returned. On success the provider's notification drives the
    /// resolution; the accepted handle is returned for `await_resolution`.
    pub async fn login(&self, email: &str, password: &str) -> Option<Uuid> {
        self.set_auth_error(None);

        match self.provider.sign_in_with_password(email, password).await {
            Ok(identity) => {
                tracing::info!(uid = %identity.uid, "credential exchange succeeded");
                Some(identity.uid)
            }
            Err(error) => {
                let message = if error.is_credential_failure() {
                    INVALID_CREDENTIALS_MESSAGE
                } else {
                    LOGIN_FAILED_MESSAGE
                };
                let error = ResolutionError::ProviderAuthFailure(error);
                tracing::warn!(%error, "login failed");
                self.set_auth_error(Some(message));
                None
            }
        }
    }

    /// await_resolution
    ///
    /// Waits until the resolution of `uid` has an outcome: authorized as
    /// `uid`, or turned away with an `auth_error`. Gives up after the
    /// resolution timeout and returns whatever is published then.
    pub async fn await_resolution(&self, uid: Uuid) -> SessionSnapshot {
        let mut receiver = self.snapshot.subscribe();
        let outcome = receiver
            .wait_for(|snapshot| snapshot.uid() == Some(uid) || snapshot.auth_error.is_some());
        // Margin for the notification hop before the resolution starts.
        let limit = self.resolve_timeout + Duration::from_secs(1);

        match tokio::time::timeout(limit, outcome).await {
            Ok(Ok(snapshot)) => snapshot.clone(),
            _ => self.snapshot(),
        }
    }

    /// logout
    ///
    /// Fire-and-forget. The provider's absence notification moves the state
    /// to Anonymous.
    pub async fn logout(&self) {
        self.set_auth_error(None);
        if let Err(error) = self.provider.sign_out().await {
            tracing::warn!(%error, "sign-out failed at the provider; local session dropped");
        }
    }

    /// register
    ///
    /// Creates a credential and a CUSTOMER profile keyed by its handle.
    /// CUSTOMER never passes the console's gate, so the account cannot sign
    /// in here. Failures surface through `auth_error` and a `None` result.
    pub async fn register(&self, email: &str, password: &str) -> Option<ProfileEntry> {
        let identity = match self.provider.sign_up(email, password).await {
            Ok(identity) => identity,
            Err(error) => {
                tracing::warn!(%error, "registration rejected by the auth provider");
                self.set_auth_error(Some(match error {
                    ProviderError::AccountExists => ACCOUNT_EXISTS_MESSAGE,
                    _ => REGISTRATION_FAILED_MESSAGE,
                }));
                return None;
            }
        };

        let profile = NewProfile::customer(identity.email.as_deref().unwrap_or(email));
        match self.repo.put_profile(identity.uid, profile).await {
            Ok(profile) => {
                tracing::info!(uid = %identity.uid, "registered customer account");
                Some(ProfileEntry {
                    uid: identity.uid,
                    profile,
                })
            }
            Err(error) => {
                tracing::error!(uid = %identity.uid, %error, "failed to write customer profile");
                self.set_auth_error(Some(REGISTRATION_FAILED_MESSAGE));
                None
            }
        }
    }

    /// refresh
    ///
    /// Token refresh. A successful refresh is an identity notification and
    /// re-runs the resolution for the same handle.
    pub async fn refresh(&self) {
        if let Err(error) = self.provider.refresh_session().await {
            tracing::warn!(%error, "session refresh failed");
        }
    }
}

/// AuthorityState
///
/// The concrete type used to share the session authority across the application.
pub type AuthorityState = Arc<SessionAuthority>;
