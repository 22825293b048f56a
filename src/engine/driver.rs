//! Delivery driver: sequential send-then-record over the eligible batch.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::models::ledger::{DeliveryStatus, LedgerEntry};
use crate::models::recipient::RecipientId;
use crate::{AppError, Result};

use super::clock::Clock;
use super::selector::EligibleRecipient;
use super::{DeliveryOutcome, EngineSettings, NotificationStore, Notifier};

/// Longest rate-limit wait honoured before giving up on a recipient.
pub const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(30);

/// Counters for one delivery batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients a ledger entry was produced for.
    pub attempted: usize,
    /// Entries recorded as `Success`.
    pub delivered: usize,
    /// Entries recorded as `Failed`.
    pub failed: usize,
    /// Inserts that found an entry already present (concurrent writer).
    pub duplicates: usize,
}

/// Sends the follow-up to each eligible recipient and records the outcome.
pub struct DeliveryDriver {
    store: Arc<dyn NotificationStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    message_text: String,
    send_pacing: Duration,
    send_timeout: Duration,
}

impl DeliveryDriver {
    /// Build a driver from shared collaborators and engine settings.
    #[must_use]
    pub fn new(
        store: Arc<dyn NotificationStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            message_text: settings.message_text.clone(),
            send_pacing: settings.send_pacing,
            send_timeout: settings.send_timeout,
        }
    }

    /// Deliver to every recipient in order, writing one ledger entry each.
    ///
    /// A refused or failed send is recorded as `Failed` and the batch
    /// continues. The pacing pause sits between sends and is not
    /// interruptible.
    ///
    /// # Errors
    ///
    /// Returns the store error if a ledger write fails; the remaining
    /// recipients are left untouched and become eligible again next cycle.
    /// Returns `AppError::Unauthorized` without writing anything for the
    /// current recipient when the channel rejects the credentials.
    pub async fn deliver(&self, eligible: &[EligibleRecipient]) -> Result<DeliveryReport> {
        let mut report = DeliveryReport::default();

        for (index, target) in eligible.iter().enumerate() {
            if index > 0 && !self.send_pacing.is_zero() {
                tokio::time::sleep(self.send_pacing).await;
            }

            let entry = match self.attempt(&target.recipient_id).await {
                Ok(entry) => entry,
                Err(err) => {
                    error!(
                        %err,
                        attempted = report.attempted,
                        remaining = eligible.len() - index,
                        "channel credentials rejected; aborting batch"
                    );
                    return Err(err);
                }
            };

            let inserted = match self.store.insert_ledger_entry(&entry).await {
                Ok(inserted) => inserted,
                Err(err) => {
                    error!(
                        %err,
                        recipient_id = %target.recipient_id,
                        attempted = report.attempted,
                        remaining = eligible.len() - index - 1,
                        "ledger write failed; aborting batch"
                    );
                    return Err(err);
                }
            };

            report.attempted += 1;
            match entry.status {
                DeliveryStatus::Success => report.delivered += 1,
                DeliveryStatus::Failed => report.failed += 1,
            }
            if !inserted {
                warn!(
                    recipient_id = %target.recipient_id,
                    "ledger already held an entry for recipient; another instance may be running"
                );
                report.duplicates += 1;
            }
        }

        Ok(report)
    }

    /// One send (plus at most one rate-limit retry) turned into a ledger entry.
    async fn attempt(&self, recipient: &RecipientId) -> Result<LedgerEntry> {
        let mut outcome = self.send_bounded(recipient).await?;

        if let DeliveryOutcome::RateLimited { retry_after } = outcome {
            let wait = retry_after.min(MAX_RATE_LIMIT_WAIT);
            warn!(recipient_id = %recipient, wait = ?wait, "channel rate limited; retrying once");
            tokio::time::sleep(wait).await;
            outcome = self.send_bounded(recipient).await?;
        }

        let now = self.clock.now();
        Ok(match outcome {
            DeliveryOutcome::Delivered => {
                info!(recipient_id = %recipient, channel = self.notifier.name(), "follow-up delivered");
                LedgerEntry::success(recipient.clone(), now)
            }
            DeliveryOutcome::Failed(reason) => {
                warn!(recipient_id = %recipient, %reason, "channel refused follow-up");
                LedgerEntry::failed(recipient.clone(), now, reason)
            }
            DeliveryOutcome::RateLimited { .. } => {
                warn!(recipient_id = %recipient, "still rate limited after retry");
                LedgerEntry::failed(recipient.clone(), now, "rate limited")
            }
        })
    }

    /// Call the notifier under the send timeout.
    ///
    /// Timeouts and transport faults become `Failed` outcomes; only
    /// credential rejection is returned as an error.
    async fn send_bounded(&self, recipient: &RecipientId) -> Result<DeliveryOutcome> {
        let call = self.notifier.send(recipient, &self.message_text);
        match tokio::time::timeout(self.send_timeout, call).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(AppError::Unauthorized(msg))) => Err(AppError::Unauthorized(msg)),
            Ok(Err(err)) => {
                warn!(recipient_id = %recipient, %err, "notifier transport error");
                Ok(DeliveryOutcome::Failed(err.to_string()))
            }
            Err(_) => {
                warn!(recipient_id = %recipient, timeout = ?self.send_timeout, "notifier call timed out");
                Ok(DeliveryOutcome::Failed(format!(
                    "send timed out after {}ms",
                    self.send_timeout.as_millis()
                )))
            }
        }
    }
}
