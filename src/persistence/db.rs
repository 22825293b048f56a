//! `SQLite` connection pool and schema bootstrap.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::{AppError, Result};

use super::schema;

/// Alias for the shared `SQLite` pool.
pub type Database = SqlitePool;

const MAX_CONNECTIONS: u32 = 4;

/// Open a file-backed pool and apply the schema.
///
/// `timeout` bounds connection acquisition and lock waits so a stuck store
/// cannot stall the poll loop.
///
/// # Errors
///
/// Returns `AppError::Config` if `database_url` cannot be parsed,
/// `AppError::StoreUnavailable` if the database cannot be opened, and
/// `AppError::Db` if the schema cannot be applied.
pub async fn connect(database_url: &str, timeout: Duration) -> Result<Database> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|err| AppError::Config(format!("invalid database_url: {err}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(timeout)
        .connect_with(options)
        .await?;

    schema::bootstrap_schema(&pool).await?;
    Ok(pool)
}

/// Open a single-connection in-memory database with the schema applied.
///
/// The connection is pinned for the lifetime of the pool; dropping it would
/// discard the database.
///
/// # Errors
///
/// Returns `AppError::Db` if the connection or schema bootstrap fails.
pub async fn connect_memory() -> Result<Database> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    schema::bootstrap_schema(&pool).await?;
    Ok(pool)
}

/// Round-trip a trivial query to confirm the store is reachable.
///
/// # Errors
///
/// Returns `AppError::StoreUnavailable` (or `AppError::Db`) when the query
/// cannot be executed.
pub async fn ping(db: &Database) -> Result<()> {
    sqlx::query("SELECT 1").execute(db).await?;
    Ok(())
}
