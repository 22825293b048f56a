//! Eligibility selector: time filter plus set difference against the ledger.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::entity::Candidate;
use crate::models::recipient::RecipientId;
use crate::Result;

use super::NotificationStore;

/// A recipient that should be notified in this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleRecipient {
    /// Store row the recipient came from.
    pub entity_id: i64,
    /// Validated recipient.
    pub recipient_id: RecipientId,
    /// Entity creation time.
    pub created_at: DateTime<Utc>,
}

/// Output of one selection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Recipients to notify, in store order.
    pub eligible: Vec<EligibleRecipient>,
    /// Rows skipped because the recipient or timestamp was malformed.
    pub skipped_malformed: usize,
    /// Rows skipped because the recipient already has a ledger entry.
    pub already_recorded: usize,
}

/// Latest creation time that is eligible at `now`.
#[must_use]
pub fn eligibility_threshold(now: DateTime<Utc>, delay: chrono::Duration) -> DateTime<Utc> {
    now.checked_sub_signed(delay)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Apply the eligibility predicate to already-fetched rows.
///
/// A candidate is eligible iff its recipient is well-formed,
/// `created_at <= now - delay`, and the recipient is absent from
/// `ledger_keys`. Malformed rows are logged and skipped, never fatal.
/// Store order is preserved and each recipient appears at most once.
#[must_use]
pub fn filter_eligible(
    now: DateTime<Utc>,
    delay: chrono::Duration,
    candidates: Vec<Candidate>,
    ledger_keys: &HashSet<String>,
) -> Selection {
    let threshold = eligibility_threshold(now, delay);
    let mut selection = Selection::default();
    let mut seen: HashSet<RecipientId> = HashSet::new();

    for candidate in candidates {
        let recipient_id = match RecipientId::from_raw(&candidate.recipient) {
            Ok(id) => id,
            Err(reason) => {
                warn!(entity_id = candidate.entity_id, %reason, "skipping entity with malformed recipient");
                selection.skipped_malformed += 1;
                continue;
            }
        };

        let Some(created_at) = candidate.created_at else {
            warn!(
                entity_id = candidate.entity_id,
                recipient_id = %recipient_id,
                "skipping entity with unreadable created_at"
            );
            selection.skipped_malformed += 1;
            continue;
        };

        if created_at > threshold {
            continue;
        }

        if ledger_keys.contains(recipient_id.as_str()) {
            selection.already_recorded += 1;
            continue;
        }

        if !seen.insert(recipient_id.clone()) {
            debug!(entity_id = candidate.entity_id, recipient_id = %recipient_id, "duplicate recipient row");
            continue;
        }

        selection.eligible.push(EligibleRecipient {
            entity_id: candidate.entity_id,
            recipient_id,
            created_at,
        });
    }

    selection
}

/// Read the ledger and the candidate set, then filter.
///
/// Either read failing aborts the selection; no partial result is ever
/// returned.
///
/// # Errors
///
/// Propagates the store error unchanged so the scheduler can tell an
/// unreachable store from a failed query.
pub async fn select_eligible(
    store: &dyn NotificationStore,
    now: DateTime<Utc>,
    delay: chrono::Duration,
) -> Result<Selection> {
    let ledger_keys = store.find_ledger_keys().await?;
    let candidates = store
        .find_eligible_candidates(eligibility_threshold(now, delay))
        .await?;
    Ok(filter_eligible(now, delay, candidates, &ledger_keys))
}
