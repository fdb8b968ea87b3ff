//! Per-owner user profile blob.

use sqlx::PgPool;

pub async fn get_profile(
    pool: &PgPool,
    owner: &str,
) -> Result<Option<serde_json::Value>, sqlx::Error> {
    let row: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT profile FROM profiles WHERE owner = $1")
            .bind(owner)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(|(profile,)| profile))
}

pub async fn put_profile(
    pool: &PgPool,
    owner: &str,
    profile: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO profiles (owner, profile) VALUES ($1, $2)
        ON CONFLICT (owner) DO UPDATE SET profile = EXCLUDED.profile, updated_at = now()
        "#,
    )
    .bind(owner)
    .bind(profile)
    .execute(pool)
    .await?;

    Ok(())
}
