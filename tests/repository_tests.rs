use serial_test::serial;
use sqlx::PgPool;
use std::sync::Arc;
use storedesk::{
    models::{NewProfile, profile_role},
    repository::{InMemoryRepository, PostgresRepository, ProfileRepository, RepositoryError},
};
use tokio::test;
use uuid::Uuid;

// --- Test Data Helpers ---

fn new_profile(email: &str, role: &str) -> NewProfile {
    NewProfile {
        email: email.to_string(),
        name: None,
        role: role.to_string(),
        store_id: None,
    }
}

// --- In-memory store ---

#[test]
async fn probe_returns_at_most_the_limit() {
    let repo = InMemoryRepository::with_profiles(
        (0..5).map(|i| (Uuid::new_v4(), new_profile(&format!("{i}@x.com"), "CUSTOMER"))),
    );

    assert_eq!(repo.probe_profiles(1).await.unwrap().len(), 1);
    assert_eq!(repo.probe_profiles(10).await.unwrap().len(), 5);
    assert!(InMemoryRepository::new().probe_profiles(1).await.unwrap().is_empty());
}

#[test]
async fn create_if_empty_only_writes_into_an_empty_store() {
    let repo = InMemoryRepository::new();
    let first = Uuid::new_v4();

    assert!(repo
        .create_if_empty(first, NewProfile::bootstrap_super_admin(Some("a@x.com")))
        .await
        .unwrap());
    assert!(!repo
        .create_if_empty(Uuid::new_v4(), NewProfile::bootstrap_super_admin(Some("b@x.com")))
        .await
        .unwrap());

    assert_eq!(repo.len(), 1);
    let stored = repo.get_profile(first).await.unwrap().unwrap();
    assert_eq!(stored.role, profile_role::SUPER_ADMIN);
    assert_eq!(stored.email, "a@x.com");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_create_if_empty_has_one_winner() {
    let repo = Arc::new(InMemoryRepository::new());

    let attempts: Vec<_> = (0..8)
        .map(|i| {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.create_if_empty(
                    Uuid::new_v4(),
                    NewProfile::bootstrap_super_admin(Some(&format!("{i}@x.com"))),
                )
                .await
                .unwrap()
            })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        if attempt.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(repo.len(), 1);
}

#[test]
async fn put_profile_replaces_but_keeps_created_at() {
    let repo = InMemoryRepository::new();
    let uid = Uuid::new_v4();

    let created = repo
        .put_profile(uid, new_profile("a@x.com", profile_role::CUSTOMER))
        .await
        .unwrap();
    let replaced = repo
        .put_profile(
            uid,
            NewProfile {
                store_id: Some("s1".to_string()),
                ..new_profile("a@x.com", profile_role::STORE_ADMIN)
            },
        )
        .await
        .unwrap();

    assert_eq!(replaced.role, profile_role::STORE_ADMIN);
    assert_eq!(replaced.store_id.as_deref(), Some("s1"));
    assert_eq!(replaced.created_at, created.created_at);
    assert_eq!(repo.len(), 1);
}

#[test]
async fn list_profiles_is_oldest_first() {
    let repo = InMemoryRepository::new();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    repo.put_profile(first, new_profile("a@x.com", profile_role::SUPER_ADMIN))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    repo.put_profile(second, new_profile("b@x.com", profile_role::CUSTOMER))
        .await
        .unwrap();

    let uids: Vec<Uuid> = repo
        .list_profiles()
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.uid)
        .collect();
    assert_eq!(uids, vec![first, second]);
}

#[test]
async fn failing_store_reports_unavailable_and_counts_calls() {
    let repo = InMemoryRepository::new_failing();

    let err = repo.get_profile(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Unavailable(_)));
    assert_eq!(repo.calls(), 1);

    repo.set_failing(false);
    assert!(repo.get_profile(Uuid::new_v4()).await.unwrap().is_none());
    assert_eq!(repo.calls(), 2);
}

// --- Postgres store ---

/// A simple structure to hold the database pool for testing
struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    async fn setup() -> Self {
        dotenv::dotenv().ok();

        let db_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set to run integration tests");

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations.");

        sqlx::query("DELETE FROM profiles")
            .execute(&pool)
            .await
            .expect("Failed to clear profiles.");

        DbTestContext { pool }
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

#[test]
#[serial]
#[ignore = "needs a Postgres instance at DATABASE_URL"]
async fn postgres_upsert_and_lookup() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let uid = Uuid::new_v4();

    assert!(repo.get_profile(uid).await.unwrap().is_none());

    let created = repo
        .put_profile(uid, new_profile("a@x.com", profile_role::CUSTOMER))
        .await
        .unwrap();
    let promoted = repo
        .put_profile(
            uid,
            NewProfile {
                store_id: Some("s1".to_string()),
                ..new_profile("a@x.com", profile_role::STORE_ADMIN)
            },
        )
        .await
        .unwrap();

    assert_eq!(promoted.created_at, created.created_at);
    let fetched = repo.get_profile(uid).await.unwrap().unwrap();
    assert_eq!(fetched.role, profile_role::STORE_ADMIN);
    assert_eq!(fetched.store_id.as_deref(), Some("s1"));

    let listed = repo.list_profiles().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].uid, uid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
#[ignore = "needs a Postgres instance at DATABASE_URL"]
async fn postgres_concurrent_bootstrap_has_one_winner() {
    let ctx = DbTestContext::setup().await;
    let repo = Arc::new(ctx.repository());

    let attempts: Vec<_> = (0..4)
        .map(|i| {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.create_if_empty(
                    Uuid::new_v4(),
                    NewProfile::bootstrap_super_admin(Some(&format!("{i}@x.com"))),
                )
                .await
                .unwrap()
            })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        if attempt.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(repo.probe_profiles(10).await.unwrap().len(), 1);
}
