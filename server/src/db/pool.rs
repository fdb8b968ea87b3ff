//! Postgres pool setup.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub type Pool = PgPool;

fn options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
}

/// Connect to the record store database.
pub async fn create_pool(database_url: &str) -> Result<Pool, sqlx::Error> {
    options().connect(database_url).await
}

/// A pool that connects on first use.
#[cfg(test)]
pub fn lazy_pool(database_url: &str) -> Result<Pool, sqlx::Error> {
    options().connect_lazy(database_url)
}

/// Apply the schema migrations in `./migrations`.
pub async fn run_migrations(pool: &Pool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
