//! Process configuration read from the environment (and `.env`, when present).

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var: {0}")]
    Missing(&'static str),

    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub batch_size: u32,
    /// How long a claimed job may stay RUNNING before it is released.
    pub lease: Duration,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub chat_model: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// True when `JWT_SECRET` was unset and the development secret is in use.
    pub jwt_secret_is_default: bool,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub worker_service_token: Option<String>,
    pub default_daily_token_budget: u64,
    pub worker: WorkerConfig,
    pub openai: OpenAiConfig,
}

impl AppConfig {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let use_persistent_stores = vars.bool("USE_PERSISTENT_STORES", false);
        let database_url = vars.string("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let jwt_secret = vars.string("JWT_SECRET");
        let jwt_secret_is_default = jwt_secret.is_none();

        Ok(Self {
            bind_addr: vars.parsed("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            jwt_secret: jwt_secret.unwrap_or_else(|| DEV_JWT_SECRET.to_string()),
            jwt_secret_is_default,
            use_persistent_stores,
            database_url,
            worker_service_token: vars.string("AI_WORKER_SERVICE_TOKEN"),
            default_daily_token_budget: vars.parsed("DEFAULT_DAILY_TOKEN_BUDGET", 10_000)?,
            worker: WorkerConfig {
                enabled: vars.bool("WORKER_ENABLED", false),
                poll_interval: Duration::from_millis(vars.parsed("WORKER_POLL_INTERVAL_MS", 2_000)?),
                batch_size: vars.parsed("WORKER_BATCH_SIZE", 5)?,
                lease: Duration::from_secs(vars.parsed("WORKER_LEASE_SECS", 600)?),
            },
            openai: OpenAiConfig {
                api_key: vars.string("OPENAI_API_KEY"),
                base_url: vars
                    .string("OPENAI_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                chat_model: vars
                    .string("OPENAI_CHAT_MODEL")
                    .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            },
        })
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    /// Set and non-blank.
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        match self.string(key) {
            Some(v) => matches!(v.trim(), "1" | "true" | "TRUE" | "yes" | "YES"),
            None => default,
        }
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(v) => v.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                message: e.to_string(),
            }),
            None => Ok(default),
        }
    }
}
