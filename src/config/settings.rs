//! Server settings and Telegram configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Telegram API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Directory holding one session file per account.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("sessions")
}

impl TelegramConfig {
    /// Creates a new Telegram configuration.
    #[must_use]
    pub fn new(api_id: i32, api_hash: String) -> Self {
        Self {
            api_id,
            api_hash,
            sessions_dir: default_sessions_dir(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_API_ID` and `TG_API_HASH` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id: i32 = std::env::var("TG_API_ID")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_ID"))?
            .parse()
            .map_err(|_| ConfigError::InvalidApiId)?;

        let api_hash = std::env::var("TG_API_HASH")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_HASH"))?;

        let sessions_dir = std::env::var("TG_SESSIONS_DIR")
            .map_or_else(|_| default_sessions_dir(), PathBuf::from);

        Ok(Self {
            api_id,
            api_hash,
            sessions_dir,
        })
    }
}

/// HTTP server and scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Path of the JSON file holding account records.
    #[serde(default = "default_accounts_path")]
    pub accounts_path: PathBuf,

    /// Directory served for `GET /`.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Ceiling for each provider step of a scheduled action, in seconds.
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,

    /// How long an unverified login stays claimable, in seconds.
    #[serde(default = "default_pending_login_ttl")]
    pub pending_login_ttl_secs: u64,

    /// How many finished job records are kept for inspection.
    #[serde(default = "default_max_finished_jobs")]
    pub max_finished_jobs: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_owned()
}

fn default_accounts_path() -> PathBuf {
    PathBuf::from("accounts.json")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_action_timeout() -> u64 {
    15
}

fn default_pending_login_ttl() -> u64 {
    600 // login codes are short-lived anyway
}

fn default_max_finished_jobs() -> usize {
    1000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            accounts_path: default_accounts_path(),
            static_dir: default_static_dir(),
            action_timeout_secs: default_action_timeout(),
            pending_login_ttl_secs: default_pending_login_ttl(),
            max_finished_jobs: default_max_finished_jobs(),
        }
    }
}

impl ServerSettings {
    /// Creates server settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| default_bind_addr()),
            accounts_path: std::env::var("ACCOUNTS_PATH")
                .map_or_else(|_| default_accounts_path(), PathBuf::from),
            static_dir: std::env::var("STATIC_DIR")
                .map_or_else(|_| default_static_dir(), PathBuf::from),
            action_timeout_secs: env_number("ACTION_TIMEOUT_SECS")
                .unwrap_or_else(default_action_timeout),
            pending_login_ttl_secs: env_number("PENDING_LOGIN_TTL_SECS")
                .unwrap_or_else(default_pending_login_ttl),
            max_finished_jobs: env_number("MAX_FINISHED_JOBS")
                .unwrap_or_else(default_max_finished_jobs),
        }
    }

    /// Timeout applied to each provider step of an action.
    #[must_use]
    pub const fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    /// Lifetime of a pending login.
    #[must_use]
    pub const fn pending_login_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_login_ttl_secs)
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,
}
