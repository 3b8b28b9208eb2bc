//! Exchange configuration

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Exchange configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Database connection string
    pub database_url: String,
    /// Connection pool size
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,
    /// Create tables and indexes on connect
    pub run_migrations: bool,
    /// List the default instruments on connect
    pub seed_default_instruments: bool,
    /// Rebuild books from the store on connect
    pub recover_on_start: bool,
    /// Price levels per side in depth snapshots
    pub depth_levels: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/exchange".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 5,
            run_migrations: true,
            seed_default_instruments: true,
            recover_on_start: true,
            depth_levels: 10,
        }
    }
}

impl ExchangeConfig {
    /// Load configuration from `EXCHANGE_*` environment variables; unset
    /// variables keep their defaults
    ///
    /// # Errors
    /// Returns an error if a variable is set but cannot be parsed
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] over an arbitrary key lookup
    ///
    /// # Errors
    /// Returns an error if a value is present but cannot be parsed
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            database_url: lookup("EXCHANGE_DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: parse_var(&lookup, "EXCHANGE_MAX_CONNECTIONS", defaults.max_connections)?,
            acquire_timeout_secs: parse_var(
                &lookup,
                "EXCHANGE_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout_secs,
            )?,
            run_migrations: parse_var(&lookup, "EXCHANGE_RUN_MIGRATIONS", defaults.run_migrations)?,
            seed_default_instruments: parse_var(
                &lookup,
                "EXCHANGE_SEED_INSTRUMENTS",
                defaults.seed_default_instruments,
            )?,
            recover_on_start: parse_var(&lookup, "EXCHANGE_RECOVER_ON_START", defaults.recover_on_start)?,
            depth_levels: parse_var(&lookup, "EXCHANGE_DEPTH_LEVELS", defaults.depth_levels)?,
        })
    }

    /// Pool acquire timeout
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}
