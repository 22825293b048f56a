//! Entity repository: the population the follow-up engine polls.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::entity::Candidate;
use crate::models::recipient::{RawRecipient, RecipientId};
use crate::Result;

use super::db::Database;
use super::{format_timestamp, parse_stored_timestamp};

/// Repository wrapper around `SQLite` for entity records.
#[derive(Clone)]
pub struct EntityRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
///
/// `recipient_id` is split by storage class in SQL so that decoding never
/// fails on a malformed value.
#[derive(sqlx::FromRow)]
struct CandidateRow {
    id: i64,
    recipient_type: String,
    recipient_int: Option<i64>,
    recipient_text: Option<String>,
    created_at: Option<String>,
}

impl CandidateRow {
    fn into_candidate(self) -> Candidate {
        let recipient = match (self.recipient_type.as_str(), self.recipient_int, self.recipient_text) {
            ("null", _, _) => RawRecipient::Missing,
            ("integer", Some(value), _) => RawRecipient::Integer(value),
            ("text", _, Some(text)) => RawRecipient::Text(text),
            (other, _, _) => RawRecipient::Unsupported(other.to_owned()),
        };
        let created_at = self.created_at.as_deref().and_then(parse_stored_timestamp);

        Candidate {
            entity_id: self.id,
            recipient,
            created_at,
        }
    }
}

impl EntityRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Register a recipient as a new entity.
    ///
    /// Returns `false` when the recipient was already registered; the
    /// original `created_at` is kept so the eligibility window is not reset.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn register(
        &self,
        recipient: &RecipientId,
        display_name: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        let created_at = format_timestamp(created_at);
        let result = sqlx::query(
            "INSERT INTO entity (recipient_id, display_name, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(recipient_id) DO NOTHING",
        )
        .bind(recipient.as_str())
        .bind(display_name)
        .bind(&created_at)
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Entities created at or before `threshold` with a non-null recipient,
    /// in row order.
    ///
    /// Rows whose `created_at` cannot be interpreted as a date by `SQLite`
    /// are excluded here; everything else is returned raw for validation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StoreUnavailable` or `AppError::Db` if the query
    /// fails. An empty result is not an error.
    pub async fn find_eligible_candidates(&self, threshold: DateTime<Utc>) -> Result<Vec<Candidate>> {
        let threshold = format_timestamp(threshold);
        let rows: Vec<CandidateRow> = sqlx::query_as(
            "SELECT id,
                    typeof(recipient_id) AS recipient_type,
                    CASE WHEN typeof(recipient_id) = 'integer' THEN recipient_id END AS recipient_int,
                    CASE WHEN typeof(recipient_id) = 'text' THEN recipient_id END AS recipient_text,
                    CAST(created_at AS TEXT) AS created_at
             FROM entity
             WHERE recipient_id IS NOT NULL
               AND julianday(created_at) <= julianday(?1)
             ORDER BY id ASC",
        )
        .bind(&threshold)
        .fetch_all(self.db.as_ref())
        .await?;

        Ok(rows.into_iter().map(CandidateRow::into_candidate).collect())
    }

    /// Total number of registered entities.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entity")
            .fetch_one(self.db.as_ref())
            .await?;
        Ok(count)
    }
}
