//! Local SQLite database backing the queue and the dataset mirror.

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Type alias for the local database pool.
pub type Pool = SqlitePool;

/// Open (creating if needed) the local database and run migrations.
///
/// An in-memory URL gets a single connection that is never recycled; each
/// SQLite memory connection would otherwise see its own empty database.
pub async fn open_pool(database_url: &str) -> Result<Pool> {
    let in_memory = database_url.contains(":memory:");
    let mut options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 4 });
    if in_memory {
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }
    let pool = pool_options.connect_with(options).await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
