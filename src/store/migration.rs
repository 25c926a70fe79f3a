//! Schema management for the Postgres backend.
//!
//! Migrations are embedded at compile time from `./migrations` and applied
//! whenever a container connects, so a container never runs against a stale
//! schema.

use sqlx::{PgPool, migrate::Migrator};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply pending migrations. Already-applied migrations are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    log::info!("checking database migration state");

    MIGRATOR.run(pool).await?;

    log::info!("database migrations up to date");
    Ok(())
}

/// Revert every migration and apply them again, dropping all records.
///
/// Intended for development stores only.
pub async fn reset_database(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    log::warn!("resetting record store schema");

    MIGRATOR.undo(pool, 0).await?;
    MIGRATOR.run(pool).await?;

    log::info!("record store schema recreated");
    Ok(())
}
