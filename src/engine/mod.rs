//! Eligibility-and-deduplication engine.
//!
//! The engine reads candidates and the ledger through [`NotificationStore`],
//! delivers through a [`Notifier`], and records exactly one ledger entry per
//! attempted recipient. The ledger is the only source of dedup truth, so a
//! restarted process picks up where the previous one stopped.

pub mod backoff;
pub mod clock;
pub mod driver;
pub mod scheduler;
pub mod selector;

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::entity::Candidate;
use crate::models::ledger::LedgerEntry;
use crate::models::recipient::RecipientId;
use crate::Result;

/// Result of a single delivery attempt as reported by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The channel accepted the message.
    Delivered,
    /// The channel refused delivery to this recipient (blocked, unknown
    /// chat, archived channel ...). Carries the channel's reason.
    Failed(String),
    /// The channel asked the caller to slow down before retrying.
    RateLimited {
        /// Wait requested by the channel.
        retry_after: Duration,
    },
}

/// Outbound messaging capability.
///
/// Ordinary per-recipient refusals are `Ok(DeliveryOutcome::Failed)`.
/// `Err(AppError::Unauthorized)` signals a credential problem that affects
/// every recipient; any other `Err` is a transport fault for this send.
pub trait Notifier: Send + Sync {
    /// Channel name used in logs.
    fn name(&self) -> &'static str;

    /// Send `text` to `recipient`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Unauthorized`](crate::AppError::Unauthorized) on
    /// rejected credentials and [`AppError::Notifier`](crate::AppError::Notifier)
    /// on transport faults.
    fn send<'a>(
        &'a self,
        recipient: &'a RecipientId,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryOutcome>> + Send + 'a>>;
}

/// Store capability consumed by the engine.
///
/// Implementations must return an empty collection for "no rows" and
/// reserve [`AppError::StoreUnavailable`](crate::AppError::StoreUnavailable)
/// for connectivity failures.
pub trait NotificationStore: Send + Sync {
    /// Confirm the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StoreUnavailable` when it is not.
    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Entities created at or before `threshold` with a non-null recipient.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails; callers must not act on a
    /// partial result.
    fn find_eligible_candidates(
        &self,
        threshold: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Candidate>>> + Send + '_>>;

    /// Recipient ids present in the ledger, whatever their status.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn find_ledger_keys(&self) -> Pin<Box<dyn Future<Output = Result<HashSet<String>>> + Send + '_>>;

    /// Append a ledger entry; `Ok(false)` when the recipient already has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be confirmed.
    fn insert_ledger_entry<'a>(
        &'a self,
        entry: &'a LedgerEntry,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;
}

/// Engine tunables, built once from [`GlobalConfig`](crate::GlobalConfig).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Eligibility window `D`.
    pub eligibility_delay: chrono::Duration,
    /// Wait between regular cycles.
    pub poll_interval: Duration,
    /// Wait after a cycle that found the store unreachable.
    pub store_unavailable_backoff: Duration,
    /// Upper bound of the uniform jitter added to the store backoff.
    pub backoff_jitter: Duration,
    /// Pause between consecutive sends.
    pub send_pacing: Duration,
    /// Bound on a single notifier call.
    pub send_timeout: Duration,
    /// Unreachable-store streak length at which failures escalate to `error!`.
    pub unavailable_escalation_after: u32,
    /// The follow-up message.
    pub message_text: String,
}
