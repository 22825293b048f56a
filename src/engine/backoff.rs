//! Store-unavailable backoff: jittered waits and streak escalation.

use std::time::Duration;

use rand::Rng;

/// `base` plus a uniformly random extra in `0..=max_jitter`.
#[must_use]
pub fn jittered(base: Duration, max_jitter: Duration) -> Duration {
    if max_jitter.is_zero() {
        return base;
    }
    let jitter_ms = u64::try_from(max_jitter.as_millis()).unwrap_or(u64::MAX);
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}

/// Severity of an unreachable-store cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableLevel {
    /// Below the escalation threshold.
    Transient,
    /// The streak reached the escalation threshold.
    Escalated,
}

/// Counts consecutive cycles that found the store unreachable.
///
/// The loop never gives up; the tracker only makes a permanently broken
/// store visible in the logs. An `escalate_after` of zero disables
/// escalation.
#[derive(Debug, Clone)]
pub struct UnavailableTracker {
    escalate_after: u32,
    streak: u32,
}

impl UnavailableTracker {
    /// New tracker with an empty streak.
    #[must_use]
    pub fn new(escalate_after: u32) -> Self {
        Self {
            escalate_after,
            streak: 0,
        }
    }

    /// Record an unreachable cycle.
    pub fn record_failure(&mut self) -> UnavailableLevel {
        self.streak = self.streak.saturating_add(1);
        if self.escalate_after > 0 && self.streak >= self.escalate_after {
            UnavailableLevel::Escalated
        } else {
            UnavailableLevel::Transient
        }
    }

    /// Record a reachable cycle; returns the streak that just ended, if any.
    pub fn record_success(&mut self) -> Option<u32> {
        let ended = self.streak;
        self.streak = 0;
        (ended > 0).then_some(ended)
    }

    /// Current streak length.
    #[must_use]
    pub fn streak(&self) -> u32 {
        self.streak
    }
}
