// Diesel migration runner
// diesel_migrations requires a sync connection, so the embedded migrations
// run on a blocking task with a dedicated PgConnection.

use diesel::{Connection, PgConnection};
use diesel_migrations::MigrationHarness;
use std::error::Error;
use tracing::{debug, info};

use crate::db::diesel_pool::MIGRATIONS;

/// Run all pending migrations. Returns how many were applied.
pub async fn run_migrations(
    database_url: String,
) -> Result<usize, Box<dyn Error + Send + Sync>> {
    let applied =
        tokio::task::spawn_blocking(move || -> Result<usize, Box<dyn Error + Send + Sync>> {
            debug!("establishing sync connection for migrations");
            let mut conn = PgConnection::establish(&database_url)
                .map_err(|e| format!("Failed to establish sync connection: {}", e))?;

            let pending = conn
                .pending_migrations(MIGRATIONS)
                .map_err(|e| format!("Failed to check pending migrations: {}", e))?;

            if pending.is_empty() {
                debug!("no pending migrations");
                return Ok(0);
            }

            let applied = conn
                .run_pending_migrations(MIGRATIONS)
                .map_err(|e| format!("Migration failed: {}", e))?;

            Ok(applied.len())
        })
        .await??;

    info!("applied {} migrations", applied);
    Ok(applied)
}
