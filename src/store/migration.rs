//! Schema migrations.
//!
//! The schema lives in `./migrations` as reversible SQLx migrations. The
//! second migration seeds the default workflow states and review tags, so a
//! freshly migrated database can ingest mail once a project row exists.

use sqlx::PgPool;
use sqlx::migrate::Migrator;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply any pending migrations. Already-applied migrations are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    log::info!("checking database migration state");

    MIGRATOR.run(pool).await?;

    log::info!("database migrations up to date");
    Ok(())
}
