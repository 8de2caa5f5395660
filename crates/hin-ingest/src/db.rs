//! Database connection pool

use crate::config::DatabaseConfig;
use crate::error::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Create the single pool shared by every service in a run
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Fail early when PostGIS is missing instead of on the first spatial write
pub async fn check_postgis(pool: &PgPool) -> Result<String> {
    let version: String = sqlx::query_scalar("SELECT postgis_version()")
        .fetch_one(pool)
        .await?;
    Ok(version)
}
