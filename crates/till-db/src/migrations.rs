//! # Schema Migrations
//!
//! The schema ships inside the binary (`sqlx::migrate!`) and is brought up
//! to date every time a `Database` connects.
//!
//! ```text
//! migrations/sqlite/
//! └── 001_initial_schema.sql   products, orders, order_lines,
//!                              cash_sessions, cash_movements,
//!                              sales, installments + backstop indexes
//! ```
//!
//! Applied files are recorded in `_sqlx_migrations`; an edited file fails
//! its checksum on the next start. Schema changes go in a new
//! `NNN_description.sql`, never into an applied one.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrations from the workspace `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies every migration not yet recorded, in filename order.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    MIGRATOR.run(pool).await?;
    info!(count = MIGRATOR.migrations.len(), "Schema up to date");
    Ok(())
}

/// Returns (total_migrations, applied_migrations), for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;

    Ok((total, applied as usize))
}
