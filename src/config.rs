use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::auth::{DEFAULT_ROUNDS, MIN_ROUNDS};

pub const DEFAULT_DATA_DIR: &str = ".data";
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_LOG_FILTER: &str = "sleep_risk_screening=info";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres connection string; `None` runs on the local store only.
    pub database_url: Option<String>,
    pub data_dir: PathBuf,
    pub admin_password: Option<String>,
    pub remote_timeout: Duration,
    pub pbkdf2_rounds: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let remote_timeout = match present("SLEEP_REMOTE_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "SLEEP_REMOTE_TIMEOUT_SECS",
                        expected: "a positive number of seconds",
                        value: raw,
                    })
                }
            },
            None => Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
        };

        let pbkdf2_rounds = match present("SLEEP_PBKDF2_ROUNDS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(rounds) if rounds >= MIN_ROUNDS => rounds,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "SLEEP_PBKDF2_ROUNDS",
                        expected: "an integer of at least 1000",
                        value: raw,
                    })
                }
            },
            None => DEFAULT_ROUNDS,
        };

        Ok(Self {
            database_url: present("DATABASE_URL"),
            data_dir: present("SLEEP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            admin_password: lookup("ADMIN_PASSWORD").filter(|v| !v.is_empty()),
            remote_timeout,
            pbkdf2_rounds,
        })
    }
}
