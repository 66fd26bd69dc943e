use std::include_str;

use anyhow::{Context as _, bail};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

pub const PROFILES_SQL: &str = include_str!("profiles.sql");

/// Installs the profile table, the sign-up trigger that fills it and its row-level policies.
///
/// # Errors
///
/// Will return `Err` if the migration fails for any reason.
pub async fn migrate_profiles(pool: &PgPool) -> Result<(), anyhow::Error> {
    info!("Executing queries in file profiles.sql...");

    sqlx::raw_sql(PROFILES_SQL)
        .execute(pool)
        .await
        .context("Failed to execute profiles.sql")?;

    info!("Successfully completed migration");

    Ok(())
}

/// # Errors
///
/// Will return `Err` if the database is unreachable or the migration fails.
pub async fn migrate_database(database_url: &str) -> Result<(), anyhow::Error> {
    let res = PgPoolOptions::new()
        .max_connections(1)
        .connect(database_url)
        .await;

    if let Err(err @ (sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)) = &res {
        bail!(
            "Failed to connect to Postgres. Please ensure that the database is running and accessible. ({err})"
        );
    }

    let pool = res.context("Failed to connect to Postgres")?;

    let migrated = migrate_profiles(&pool).await;

    pool.close().await;

    migrated
}
