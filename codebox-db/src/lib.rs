//! Persistence layer for the codebox control plane.
//!
//! SQLite via sqlx. Each module owns the queries for one record family;
//! callers pass the pool explicitly so the crate carries no global state.

pub mod auth_codes;
pub mod containers;
pub mod error;
pub mod jobs;
pub mod logs;
pub mod runners;
pub mod status;
pub mod templates;
pub mod test_utils;
pub mod users;
pub mod workspaces;

pub use error::{DbError, Result};
pub use logs::WorkspaceLogStore;
pub use status::WorkspaceStatus;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::instrument;

/// Initialize the database connection pool, creating the file and its
/// parent directory if missing.
#[instrument(fields(db_path = %db_path.display()))]
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(options).await?;

    Ok(pool)
}

/// Run database migrations.
#[instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;

    Ok(())
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
