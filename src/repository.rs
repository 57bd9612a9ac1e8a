use crate::models::{NewProfile, Profile, ProfileEntry};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sqlx::PgPool;
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use uuid::Uuid;

/// Advisory lock key serializing first-user bootstrap writes.
const BOOTSTRAP_LOCK_KEY: i64 = 0x5354_4f52_4544_534b;

/// Errors raised by the profile store.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("profile store unavailable: {0}")]
    Unavailable(String),

    #[error("profile store did not answer within {0:?}")]
    Timeout(Duration),
}

/// ProfileRepository Trait
///
/// The minimum contract the session authority needs from the hosted profile
/// store. Handlers and the authority only ever see this trait, so the
/// Postgres store and the in-memory store are interchangeable.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Keyed read. `Ok(None)` means "not found", never a fault.
    async fn get_profile(&self, uid: Uuid) -> Result<Option<Profile>, RepositoryError>;

    /// Bounded existence probe: at most `limit` records, in no particular order.
    async fn probe_profiles(&self, limit: usize) -> Result<Vec<Profile>, RepositoryError>;

    /// Create-or-replace keyed write. `created_at` survives a replace.
    async fn put_profile(&self, uid: Uuid, profile: NewProfile) -> Result<Profile, RepositoryError>;

    /// Writes `profile` only if the collection holds no record at all.
    /// Returns whether the write happened.
    async fn create_if_empty(&self, uid: Uuid, profile: NewProfile)
    -> Result<bool, RepositoryError>;

    /// Every profile, oldest first. Backs the user-management screen.
    async fn list_profiles(&self) -> Result<Vec<ProfileEntry>, RepositoryError>;
}

/// RepositoryState
///
/// The concrete type used to share the profile store across the application.
pub type RepositoryState = Arc<dyn ProfileRepository>;

/// PostgresRepository
///
/// `ProfileRepository` backed by the hosted Postgres `public.profiles` table.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileRepository for PostgresRepository {
    async fn get_profile(&self, uid: Uuid) -> Result<Option<Profile>, RepositoryError> {
        let profile = sqlx::query_as::<_, Profile>(
            "SELECT email, name, role, store_id, created_at FROM profiles WHERE id = $1",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    /// probe_profiles
    ///
    /// `LIMIT` keeps this an existence check even on a large collection.
    async fn probe_profiles(&self, limit: usize) -> Result<Vec<Profile>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let profiles = sqlx::query_as::<_, Profile>(
            "SELECT email, name, role, store_id, created_at FROM profiles LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(profiles)
    }

    async fn put_profile(&self, uid: Uuid, profile: NewProfile) -> Result<Profile, RepositoryError> {
        let stored = sqlx::query_as::<_, Profile>(
            r#"
            INSERT INTO profiles (id, email, name, role, store_id, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (id) DO UPDATE
                SET email = EXCLUDED.email,
                    name = EXCLUDED.name,
                    role = EXCLUDED.role,
                    store_id = EXCLUDED.store_id
            RETURNING email, name, role, store_id, created_at
            "#,
        )
        .bind(uid)
        .bind(&profile.email)
        .bind(&profile.name)
        .bind(&profile.role)
        .bind(&profile.store_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    /// create_if_empty
    ///
    /// Emptiness check and insert run in one transaction holding a
    /// transaction-scoped advisory lock, so two concurrent first sign-ins
    /// cannot both see an empty table.
    async fn create_if_empty(
        &self,
        uid: Uuid,
        profile: NewProfile,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(BOOTSTRAP_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let occupied: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM profiles)")
            .fetch_one(&mut *tx)
            .await?;

        if occupied {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO profiles (id, email, name, role, store_id, created_at) VALUES ($1, $2, $3, $4, $5, NOW())",
        )
        .bind(uid)
        .bind(&profile.email)
        .bind(&profile.name)
        .bind(&profile.role)
        .bind(&profile.store_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_profiles(&self) -> Result<Vec<ProfileEntry>, RepositoryError> {
        let entries = sqlx::query_as::<_, ProfileEntry>(
            "SELECT id, email, name, role, store_id, created_at FROM profiles ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

/// InMemoryRepository
///
/// Process-local profile store. Used by the test suite and by local runs
/// without a `DATABASE_URL`. `set_failing(true)` makes every call return
/// `RepositoryError::Unavailable`.
#[derive(Default)]
pub struct InMemoryRepository {
    profiles: Mutex<BTreeMap<Uuid, Profile>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with the given records.
    pub fn with_profiles(seed: impl IntoIterator<Item = (Uuid, NewProfile)>) -> Self {
        let repo = Self::new();
        {
            let mut profiles = repo.profiles.lock();
            for (uid, profile) in seed {
                profiles.insert(uid, stamp(profile, None));
            }
        }
        repo
    }

    pub fn new_failing() -> Self {
        let repo = Self::new();
        repo.set_failing(true);
        repo
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of trait calls served so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.profiles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.lock().is_empty()
    }

    fn enter(&self) -> Result<(), RepositoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "in-memory store set to fail".to_string(),
            ));
        }
        Ok(())
    }
}

fn stamp(profile: NewProfile, previous: Option<&Profile>) -> Profile {
    Profile {
        email: profile.email,
        name: profile.name,
        role: profile.role,
        store_id: profile.store_id,
        created_at: previous.map_or_else(Utc::now, |p| p.created_at),
    }
}

#[async_trait]
impl ProfileRepository for InMemoryRepository {
    async fn get_profile(&self, uid: Uuid) -> Result<Option<Profile>, RepositoryError> {
        self.enter()?;
        Ok(self.profiles.lock().get(&uid).cloned())
    }

    async fn probe_profiles(&self, limit: usize) -> Result<Vec<Profile>, RepositoryError> {
        self.enter()?;
        Ok(self.profiles.lock().values().take(limit).cloned().collect())
    }

    async fn put_profile(&self, uid: Uuid, profile: NewProfile) -> Result<Profile, RepositoryError> {
        self.enter()?;
        let mut profiles = self.profiles.lock();
        let stored = stamp(profile, profiles.get(&uid));
        profiles.insert(uid, stored.clone());
        Ok(stored)
    }

    async fn create_if_empty(
        &self,
        uid: Uuid,
        profile: NewProfile,
    ) -> Result<bool, RepositoryError> {
        self.enter()?;
        // Check and insert under the same lock guard.
        let mut profiles = self.profiles.lock();
        if !profiles.is_empty() {
            return Ok(false);
        }
        profiles.insert(uid, stamp(profile, None));
        Ok(true)
    }

    async fn list_profiles(&self) -> Result<Vec<ProfileEntry>, RepositoryError> {
        self.enter()?;
        let mut entries: Vec<ProfileEntry> = self
            .profiles
            .lock()
            .iter()
            .map(|(uid, profile)| ProfileEntry {
                uid: *uid,
                profile: profile.clone(),
            })
            .collect();
        entries.sort_by_key(|entry| entry.profile.created_at);
        Ok(entries)
    }
}
