//! Postgres connection helpers shared by the conversation store and the
//! pgvector index.

use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::DatabaseConfig;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open a pool for `config.url`. Both `postgres://` and `postgresql://` work.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&config.url)
        .await?;
    tracing::info!(max_connections = config.max_connections, "Connected to Postgres");
    Ok(pool)
}

pub async fn server_version(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SHOW server_version").fetch_one(pool).await?;
    Ok(format!("postgres {}", row.0))
}

/// Installed pgvector extension version, `None` when the extension is missing.
pub async fn pgvector_version(pool: &PgPool) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT extversion FROM pg_extension WHERE extname = 'vector'")
        .fetch_optional(pool)
        .await
}
