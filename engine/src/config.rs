//! Sync engine configuration.

use std::env;
use std::time::Duration;

/// Smallest and largest accepted import chunk.
pub const IMPORT_CHUNK_RANGE: std::ops::RangeInclusive<usize> = 50..=100;

/// Tunables for the queue, coordinator, router and import pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Attempts an operation gets before it is parked
    pub max_retries: u32,
    /// Upper bound on a single executor call during a drain
    pub operation_timeout: Duration,
    /// Upper bound on a whole-dataset load or save
    pub remote_timeout: Duration,
    /// Wait after an online transition before draining
    pub online_settle_delay: Duration,
    /// Quiet period that coalesces scheduled saves
    pub save_debounce: Duration,
    /// Records per batch insert during import
    pub import_chunk_size: usize,
    /// Local SQLite database holding the queue and mirror
    pub database_url: String,
    /// Base URL of the remote store
    pub remote_url: Option<String>,
    /// Bearer token for the remote store
    pub auth_token: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            operation_timeout: Duration::from_secs(15),
            remote_timeout: Duration::from_secs(8),
            online_settle_delay: Duration::from_secs(1),
            save_debounce: Duration::from_millis(1500),
            import_chunk_size: 100,
            database_url: "sqlite://tally.db".to_string(),
            remote_url: None,
            auth_token: None,
        }
    }
}

impl SyncConfig {
    /// Load configuration from `TALLY_*` environment variables, reading a
    /// `.env` file first when one exists. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("TALLY_MAX_RETRIES") {
            config.max_retries = parse("TALLY_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("TALLY_OPERATION_TIMEOUT_MS") {
            config.operation_timeout = millis("TALLY_OPERATION_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("TALLY_REMOTE_TIMEOUT_MS") {
            config.remote_timeout = millis("TALLY_REMOTE_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("TALLY_ONLINE_SETTLE_MS") {
            config.online_settle_delay = millis("TALLY_ONLINE_SETTLE_MS", &value)?;
        }
        if let Some(value) = lookup("TALLY_SAVE_DEBOUNCE_MS") {
            config.save_debounce = millis("TALLY_SAVE_DEBOUNCE_MS", &value)?;
        }
        if let Some(value) = lookup("TALLY_IMPORT_CHUNK_SIZE") {
            config.import_chunk_size = parse("TALLY_IMPORT_CHUNK_SIZE", &value)?;
        }
        if let Some(value) = lookup("TALLY_DATABASE_URL") {
            config.database_url = value;
        }
        config.remote_url = lookup("TALLY_REMOTE_URL").filter(|v| !v.is_empty());
        config.auth_token = lookup("TALLY_AUTH_TOKEN").filter(|v| !v.is_empty());

        Ok(config)
    }

    /// The import chunk size clamped to the accepted range.
    pub fn chunk_size(&self) -> usize {
        self.import_chunk_size
            .clamp(*IMPORT_CHUNK_RANGE.start(), *IMPORT_CHUNK_RANGE.end())
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

fn millis(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse::<u64>(name, value).map(Duration::from_millis)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },
}
