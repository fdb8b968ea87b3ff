//! Configuration management for the server.

use std::env;

const DEFAULT_BATCH_LIMIT: usize = 500;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Shared secret bearer tokens must carry; `None` trusts the owner id
    pub auth_secret: Option<String>,
    /// Largest accepted batch insert
    pub batch_limit: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;

        let auth_secret = lookup("AUTH_SECRET").filter(|s| !s.is_empty());

        let batch_limit = match lookup("BATCH_LIMIT") {
            Some(raw) => raw
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidBatchLimit)?,
            None => DEFAULT_BATCH_LIMIT,
        };

        Ok(Self {
            host,
            port,
            database_url,
            auth_secret,
            batch_limit,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid BATCH_LIMIT value")]
    InvalidBatchLimit,
}
