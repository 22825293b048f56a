//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`; both the
//! notifier and the responder apply them on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// `entity.recipient_id` is untyped: rows written by other tools keep
/// their storage class and are validated on read.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS entity (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    recipient_id    UNIQUE,
    display_name    TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notification_ledger (
    id              TEXT PRIMARY KEY NOT NULL,
    recipient_id    TEXT NOT NULL UNIQUE,
    status          TEXT NOT NULL CHECK(status IN ('success','failed')),
    failure_reason  TEXT,
    sent_at         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entity_created ON entity(created_at);
CREATE INDEX IF NOT EXISTS idx_ledger_status ON notification_ledger(status);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
