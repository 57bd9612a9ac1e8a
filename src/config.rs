use std::{env, time::Duration};

/// Default upper bound on a single identity resolution.
const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 15;
/// Default inactivity after which a visitor's console session is dropped.
const DEFAULT_SESSION_IDLE_SECS: u64 = 60 * 60;

/// AppConfig
///
/// Holds the console's configuration. Immutable once loaded and shared with
/// the auth client, the profile store and the HTTP layer through `FromRef`.
#[derive(Clone)]
pub struct AppConfig {
    // Postgres connection string for the profile store. Optional in local
    // mode, where the in-memory store stands in.
    pub db_url: Option<String>,
    // Base URL of the Supabase project (auth lives under /auth/v1).
    pub auth_url: String,
    // Public API key sent as the `apikey` header.
    pub auth_api_key: String,
    // Secret used to verify provider-issued access tokens.
    pub jwt_secret: String,
    // Expected `aud` claim of access tokens.
    pub jwt_audience: String,
    // Address the console API binds to.
    pub bind_addr: String,
    // Upper bound on one identity resolution before it counts as a fault.
    pub resolve_timeout: Duration,
    // Inactivity before a visitor session (cookie and authority) expires.
    pub session_idle_timeout: Duration,
    // Seed credential for the mock provider in local runs (email, password).
    pub local_account: Option<(String, String)>,
    // Runtime environment marker. Controls the local fallbacks.
    pub env: Env,
}

/// Env
///
/// Local runs may fall back to in-memory collaborators; Production demands
/// every external service be configured.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

impl Default for AppConfig {
    /// Safe, non-panicking values for test setup.
    fn default() -> Self {
        Self {
            db_url: None,
            auth_url: "http://localhost:54321".to_string(),
            auth_api_key: "local-anon-key".to_string(),
            jwt_secret: "super-secure-test-secret-value-local".to_string(),
            jwt_audience: "authenticated".to_string(),
            bind_addr: "127.0.0.1:3000".to_string(),
            resolve_timeout: Duration::from_secs(DEFAULT_RESOLVE_TIMEOUT_SECS),
            session_idle_timeout: Duration::from_secs(DEFAULT_SESSION_IDLE_SECS),
            local_account: None,
            env: Env::Local,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from the environment.
    ///
    /// # Panics
    /// Panics when a variable required in Production is missing, so the
    /// console never starts half-configured.
    pub fn load() -> Self {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let resolve_timeout = env::var("SESSION_RESOLVE_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_RESOLVE_TIMEOUT_SECS));

        let session_idle_timeout = env::var("SESSION_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_SESSION_IDLE_SECS));

        let jwt_audience =
            env::var("SUPABASE_JWT_AUD").unwrap_or_else(|_| "authenticated".to_string());

        match env {
            Env::Local => {
                let defaults = Self::default();
                Self {
                    env: Env::Local,
                    db_url: env::var("DATABASE_URL").ok(),
                    auth_url: env::var("SUPABASE_URL").unwrap_or(defaults.auth_url),
                    auth_api_key: env::var("SUPABASE_KEY").unwrap_or(defaults.auth_api_key),
                    jwt_secret: env::var("SUPABASE_JWT_SECRET").unwrap_or(defaults.jwt_secret),
                    jwt_audience,
                    bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
                    resolve_timeout,
                    session_idle_timeout,
                    local_account: env::var("LOCAL_ADMIN_EMAIL")
                        .ok()
                        .zip(env::var("LOCAL_ADMIN_PASSWORD").ok()),
                }
            }
            Env::Production => Self {
                env: Env::Production,
                db_url: Some(
                    env::var("DATABASE_URL").expect("FATAL: DATABASE_URL required in prod"),
                ),
                auth_url: env::var("SUPABASE_URL").expect("FATAL: SUPABASE_URL required in prod"),
                auth_api_key: env::var("SUPABASE_KEY")
                    .expect("FATAL: SUPABASE_KEY required in prod"),
                jwt_secret: env::var("SUPABASE_JWT_SECRET")
                    .expect("FATAL: SUPABASE_JWT_SECRET must be set in production."),
                jwt_audience,
                bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
                resolve_timeout,
                session_idle_timeout,
                // Production never seeds credentials.
                local_account: None,
            },
        }
    }

    /// Whether the console should run against the in-memory collaborators.
    pub fn uses_local_fallback(&self) -> bool {
        self.env == Env::Local && self.db_url.is_none()
    }
}
