//! Per-visitor session authorities.
//!
//! Every visitor of the console (one browser session, identified by the
//! session cookie) owns an independent `SessionAuthority` backed by its own
//! provider session. Nothing about one visitor's sign-in is visible to
//! another.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    authority::{AuthorityState, SessionAuthority},
    provider::ProviderFactoryState,
    repository::RepositoryState,
    session::SessionSnapshot,
};

/// Session-cookie name of the console.
pub const SESSION_COOKIE_NAME: &str = "storedesk_session";

/// Key of the visitor id inside the cookie-backed session record.
const VISITOR_KEY: &str = "storedesk.visitor";

struct VisitorEntry {
    authority: AuthorityState,
    notifications: JoinHandle<()>,
    last_seen: Instant,
}

/// SessionRegistry
///
/// Owns the live authority of every visitor, keyed by visitor id.
pub struct SessionRegistry {
    provider: ProviderFactoryState,
    repo: RepositoryState,
    resolve_timeout: Duration,
    visitors: Mutex<HashMap<Uuid, VisitorEntry>>,
}

/// RegistryState
///
/// The concrete type used to share the registry across the application.
pub type RegistryState = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new(
        provider: ProviderFactoryState,
        repo: RepositoryState,
        resolve_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            repo,
            resolve_timeout,
            visitors: Mutex::new(HashMap::new()),
        }
    }

    /// The visitor's authority, if it is still live. Counts as activity.
    pub fn get(&self, id: Uuid) -> Option<AuthorityState> {
        let mut visitors = self.visitors.lock();
        let entry = visitors.get_mut(&id)?;
        entry.last_seen = Instant::now();
        Some(Arc::clone(&entry.authority))
    }

    /// open
    ///
    /// Starts a new visitor: a fresh provider session, an authority over it
    /// and its notification loop. Must be called inside a Tokio runtime.
    pub fn open(&self) -> (Uuid, AuthorityState) {
        let id = Uuid::new_v4();
        let authority = Arc::new(SessionAuthority::new(
            self.provider.open_session(),
            self.repo.clone(),
            self.resolve_timeout,
        ));
        let notifications = authority.spawn();

        self.visitors.lock().insert(
            id,
            VisitorEntry {
                authority: Arc::clone(&authority),
                notifications,
                last_seen: Instant::now(),
            },
        );
        tracing::debug!(visitor = %id, "visitor session opened");
        (id, authority)
    }

    /// Drops a visitor. Its notification loop stops and its provider
    /// session is signed out in the background.
    pub fn close(&self, id: Uuid) -> bool {
        let Some(entry) = self.visitors.lock().remove(&id) else {
            return false;
        };
        retire(entry);
        tracing::debug!(visitor = %id, "visitor session closed");
        true
    }

    /// Closes every visitor idle for longer than `max_idle`.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let expired: Vec<VisitorEntry> = {
            let mut visitors = self.visitors.lock();
            let ids: Vec<Uuid> = visitors
                .iter()
                .filter(|(_, entry)| entry.last_seen.elapsed() > max_idle)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| visitors.remove(id)).collect()
        };

        let evicted = expired.len();
        expired.into_iter().for_each(retire);
        evicted
    }

    /// spawn_sweeper
    ///
    /// Periodically evicts idle visitors. Stops once the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, max_idle: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let period = (max_idle / 2).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let evicted = registry.sweep(max_idle);
                if evicted > 0 {
                    tracing::info!(evicted, "idle visitor sessions evicted");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.visitors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.visitors.lock().is_empty()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        for (_, entry) in self.visitors.get_mut().drain() {
            entry.notifications.abort();
        }
    }
}

fn retire(entry: VisitorEntry) {
    entry.notifications.abort();
    let authority = entry.authority;
    if authority.snapshot().uid().is_some() {
        tokio::spawn(async move { authority.logout().await });
    }
}

// --- Request extractor ---

/// Visitor
///
/// The caller's cookie session and, once one was opened, its authority.
pub struct Visitor {
    session: Session,
    registry: RegistryState,
    authority: Option<AuthorityState>,
}

impl Visitor {
    /// The caller's published state. A caller without an authority is
    /// anonymous.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.authority
            .as_ref()
            .map_or_else(SessionSnapshot::anonymous, |authority| authority.snapshot())
    }

    pub fn authority(&self) -> Option<&AuthorityState> {
        self.authority.as_ref()
    }

    /// The caller's authority, opening one (and setting the cookie) on
    /// first use. A fresh authority has settled as anonymous on return.
    pub async fn authority_or_open(&mut self) -> Result<AuthorityState, StatusCode> {
        if let Some(authority) = &self.authority {
            return Ok(Arc::clone(authority));
        }

        let (id, authority) = self.registry.open();
        if let Err(error) = self.session.insert(VISITOR_KEY, id).await {
            tracing::error!(%error, "failed to store the visitor id");
            self.registry.close(id);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
        // The initial absence must land before any operation touches
        // `auth_error`.
        authority.settled().await;

        self.authority = Some(Arc::clone(&authority));
        Ok(authority)
    }
}

impl<S> FromRequestParts<S> for Visitor
where
    S: Send + Sync,
    RegistryState: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // Set by the SessionManagerLayer in `create_router`.
        let session = parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| StatusCode::INTERNAL_SERVER_ERROR.into_response())?;
        let registry = RegistryState::from_ref(state);

        let id: Option<Uuid> = session.get(VISITOR_KEY).await.map_err(|error| {
            tracing::error!(%error, "failed to read the session record");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })?;
        let authority = id.and_then(|id| registry.get(id));

        Ok(Self {
            session,
            registry,
            authority,
        })
    }
}
