//! Notification ledger repository for `SQLite` persistence.
//!
//! The ledger is append-only: there is no update or delete path.

use std::collections::HashSet;
use std::sync::Arc;

use crate::models::ledger::{DeliveryStatus, LedgerEntry};
use crate::models::recipient::RecipientId;
use crate::{AppError, Result};

use super::db::Database;
use super::{format_timestamp, parse_timestamp};

/// Repository wrapper around `SQLite` for ledger entries.
#[derive(Clone)]
pub struct LedgerRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: String,
    recipient_id: String,
    status: String,
    failure_reason: Option<String>,
    sent_at: String,
}

impl LedgerRow {
    /// Convert a database row into the domain model.
    fn into_entry(self) -> Result<LedgerEntry> {
        let status = parse_status(&self.status)?;
        let recipient_id = RecipientId::parse(&self.recipient_id)
            .map_err(|e| AppError::Db(format!("invalid ledger recipient_id: {e}")))?;
        let sent_at = parse_timestamp(&self.sent_at, "sent_at")?;

        Ok(LedgerEntry {
            id: self.id,
            recipient_id,
            status,
            failure_reason: self.failure_reason,
            sent_at,
        })
    }
}

fn parse_status(s: &str) -> Result<DeliveryStatus> {
    match s {
        "success" => Ok(DeliveryStatus::Success),
        "failed" => Ok(DeliveryStatus::Failed),
        other => Err(AppError::Db(format!("invalid ledger status: {other}"))),
    }
}

fn status_str(s: DeliveryStatus) -> &'static str {
    match s {
        DeliveryStatus::Success => "success",
        DeliveryStatus::Failed => "failed",
    }
}

impl LedgerRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append an entry unless the recipient already has one.
    ///
    /// Returns `false` when another writer recorded the recipient first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StoreUnavailable` or `AppError::Db` if the insert
    /// fails; the entry must then be treated as unwritten.
    pub async fn insert(&self, entry: &LedgerEntry) -> Result<bool> {
        let sent_at = format_timestamp(entry.sent_at);

        let result = sqlx::query(
            "INSERT INTO notification_ledger (id, recipient_id, status, failure_reason, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(recipient_id) DO NOTHING",
        )
        .bind(&entry.id)
        .bind(entry.recipient_id.as_str())
        .bind(status_str(entry.status))
        .bind(&entry.failure_reason)
        .bind(&sent_at)
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Every recipient that has a ledger entry, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StoreUnavailable` or `AppError::Db` if the query
    /// fails.
    pub async fn recorded_recipients(&self) -> Result<HashSet<String>> {
        let keys: Vec<String> = sqlx::query_scalar("SELECT recipient_id FROM notification_ledger")
            .fetch_all(self.db.as_ref())
            .await?;
        Ok(keys.into_iter().collect())
    }

    /// Retrieve the entry for a recipient.
    ///
    /// Returns `Ok(None)` if the recipient was never attempted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_recipient(&self, recipient: &RecipientId) -> Result<Option<LedgerEntry>> {
        let row: Option<LedgerRow> =
            sqlx::query_as("SELECT * FROM notification_ledger WHERE recipient_id = ?1")
                .bind(recipient.as_str())
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(LedgerRow::into_entry).transpose()
    }

    /// List entries in `sent_at` order, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a row is corrupt.
    pub async fn list(&self, status: Option<DeliveryStatus>) -> Result<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> = match status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT * FROM notification_ledger WHERE status = ?1 ORDER BY sent_at ASC",
                )
                .bind(status_str(status))
                .fetch_all(self.db.as_ref())
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM notification_ledger ORDER BY sent_at ASC")
                    .fetch_all(self.db.as_ref())
                    .await?
            }
        };

        rows.into_iter().map(LedgerRow::into_entry).collect()
    }

    /// Number of entries in the ledger.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notification_ledger")
            .fetch_one(self.db.as_ref())
            .await?;
        Ok(count)
    }
}
