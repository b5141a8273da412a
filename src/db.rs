use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, SqlitePool};
use tracing::info;

use crate::config::Config;

pub async fn create_pool(config: &Config) -> Result<SqlitePool> {
    let db_path = config.db_path();

    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating data directory: {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to database: {}", db_path.display()))?;

    info!(path = %db_path.display(), "database connected (WAL mode, foreign keys enabled)");

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the schema applied.
#[cfg(test)]
pub async fn create_memory_pool() -> Result<SqlitePool> {
    use std::str::FromStr;

    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .context("parsing in-memory database URL")?
        .foreign_keys(true);

    // Every connection to :memory: is its own database, so keep exactly one alive.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .context("opening in-memory database")?;

    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Run the migration SQL directly since sqlx::migrate! needs compile-time checking
    let migration_sql = include_str!("../migrations/20261016_000001_initial_schema.sql");

    pool.execute(migration_sql)
        .await
        .context("running database migrations")?;

    info!("database migrations applied");
    Ok(())
}
