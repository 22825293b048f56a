//! Notification ledger model: the append-only record of delivery attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::recipient::RecipientId;

/// Outcome recorded for a delivery attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// The channel accepted the message.
    Success,
    /// The attempt failed; the recipient is not retried.
    Failed,
}

/// One immutable ledger row. At most one exists per recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LedgerEntry {
    /// Unique record identifier.
    pub id: String,
    /// Recipient the attempt was made for.
    pub recipient_id: RecipientId,
    /// Attempt outcome.
    pub status: DeliveryStatus,
    /// Channel-provided reason for a failed attempt.
    pub failure_reason: Option<String>,
    /// When the attempt finished.
    pub sent_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Entry for a delivered message.
    #[must_use]
    pub fn success(recipient_id: RecipientId, sent_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            recipient_id,
            status: DeliveryStatus::Success,
            failure_reason: None,
            sent_at,
        }
    }

    /// Entry for a failed attempt.
    #[must_use]
    pub fn failed(
        recipient_id: RecipientId,
        sent_at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            recipient_id,
            status: DeliveryStatus::Failed,
            failure_reason: Some(reason.into()),
            sent_at,
        }
    }
}
