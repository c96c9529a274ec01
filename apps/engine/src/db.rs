use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Connects to the job store and applies pending migrations.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("Failed to connect to the job store")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to apply job store migrations")?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}
