//! Entity candidates read from the backing store.

use chrono::{DateTime, Utc};

use super::recipient::RawRecipient;

/// An entity row that passed the store-side eligibility filter.
///
/// Values are kept raw: the selector decides whether the row is usable.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Store row identifier; defines the deterministic processing order.
    pub entity_id: i64,
    /// Stored recipient value.
    pub recipient: RawRecipient,
    /// Creation timestamp; `None` when the stored text is not a readable date.
    pub created_at: Option<DateTime<Utc>>,
}

impl Candidate {
    /// Construct a candidate with a parsed creation time.
    #[must_use]
    pub fn new(entity_id: i64, recipient: RawRecipient, created_at: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            recipient,
            created_at: Some(created_at),
        }
    }
}
