//! Poll scheduler: runs select → deliver cycles on a fixed period.
//!
//! Cycles never overlap. A cycle that finds the store unreachable is
//! followed by the longer, jittered store backoff instead of the regular
//! period. No error ever ends the loop; only cancellation does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::AppError;

use super::backoff::{self, UnavailableLevel, UnavailableTracker};
use super::clock::Clock;
use super::driver::{DeliveryDriver, DeliveryReport};
use super::selector;
use super::{EngineSettings, NotificationStore, Notifier};

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next cycle.
    Idle,
    /// A cycle is in progress.
    RunningCycle,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Selection and delivery ran to completion.
    Completed {
        /// Recipients selected for delivery.
        selected: usize,
        /// Rows skipped as malformed.
        skipped_malformed: usize,
        /// Delivery counters.
        report: DeliveryReport,
    },
    /// The store could not be reached; nothing was read or written.
    StoreUnavailable(String),
    /// The cycle stopped early on a non-connectivity error.
    Aborted(String),
}

/// Drives the engine until cancelled.
pub struct PollScheduler {
    store: Arc<dyn NotificationStore>,
    driver: DeliveryDriver,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    running: AtomicBool,
}

impl PollScheduler {
    /// Wire the scheduler and its delivery driver.
    #[must_use]
    pub fn new(
        store: Arc<dyn NotificationStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: &EngineSettings,
    ) -> Self {
        let driver = DeliveryDriver::new(
            Arc::clone(&store),
            notifier,
            Arc::clone(&clock),
            settings,
        );
        Self {
            store,
            driver,
            clock,
            settings: settings.clone(),
            running: AtomicBool::new(false),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::RunningCycle
        } else {
            SchedulerState::Idle
        }
    }

    /// Run exactly one cycle. Never fails: every error is folded into the
    /// returned [`CycleOutcome`].
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.running.store(true, Ordering::SeqCst);
        let outcome = self.cycle_inner().await;
        self.running.store(false, Ordering::SeqCst);
        outcome
    }

    async fn cycle_inner(&self) -> CycleOutcome {
        if let Err(err) = self.store.ping().await {
            return CycleOutcome::StoreUnavailable(err.to_string());
        }

        let now = self.clock.now();
        let selection =
            match selector::select_eligible(self.store.as_ref(), now, self.settings.eligibility_delay)
                .await
            {
                Ok(selection) => selection,
                Err(err) => return Self::interrupted(&err),
            };

        debug!(
            eligible = selection.eligible.len(),
            already_recorded = selection.already_recorded,
            skipped_malformed = selection.skipped_malformed,
            "selection complete"
        );

        match self.driver.deliver(&selection.eligible).await {
            Ok(report) => CycleOutcome::Completed {
                selected: selection.eligible.len(),
                skipped_malformed: selection.skipped_malformed,
                report,
            },
            Err(err) => Self::interrupted(&err),
        }
    }

    fn interrupted(err: &AppError) -> CycleOutcome {
        if err.is_store_unavailable() {
            CycleOutcome::StoreUnavailable(err.to_string())
        } else {
            CycleOutcome::Aborted(err.to_string())
        }
    }

    /// Wait to apply after `outcome` before the next cycle.
    #[must_use]
    pub fn delay_after(&self, outcome: &CycleOutcome) -> Duration {
        match outcome {
            CycleOutcome::StoreUnavailable(_) => backoff::jittered(
                self.settings.store_unavailable_backoff,
                self.settings.backoff_jitter,
            ),
            CycleOutcome::Completed { .. } | CycleOutcome::Aborted(_) => self.settings.poll_interval,
        }
    }

    /// Loop until `cancel` fires. Cancellation is observed between cycles;
    /// a running cycle always finishes.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut tracker = UnavailableTracker::new(self.settings.unavailable_escalation_after);
        let mut cycle: u64 = 0;
        info!(
            poll_interval = ?self.settings.poll_interval,
            eligibility_delay_secs = self.settings.eligibility_delay.num_seconds(),
            "poll scheduler started"
        );

        while !cancel.is_cancelled() {
            cycle += 1;
            let outcome = self
                .run_cycle()
                .instrument(info_span!("poll_cycle", cycle))
                .await;
            Self::log_outcome(cycle, &outcome, &mut tracker);

            let delay = self.delay_after(&outcome);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!(cycles = cycle, "poll scheduler shutting down");
    }

    fn log_outcome(cycle: u64, outcome: &CycleOutcome, tracker: &mut UnavailableTracker) {
        if let CycleOutcome::StoreUnavailable(reason) = outcome {
            match tracker.record_failure() {
                UnavailableLevel::Transient => {
                    warn!(cycle, %reason, streak = tracker.streak(), "store unavailable; backing off");
                }
                UnavailableLevel::Escalated => {
                    error!(
                        cycle,
                        %reason,
                        streak = tracker.streak(),
                        "store still unavailable after repeated backoff"
                    );
                }
            }
            return;
        }

        if let Some(streak) = tracker.record_success() {
            info!(cycle, streak, "store reachable again");
        }

        match outcome {
            CycleOutcome::Completed {
                selected,
                skipped_malformed,
                report,
            } => {
                if *selected > 0 || *skipped_malformed > 0 {
                    info!(
                        cycle,
                        selected,
                        skipped_malformed,
                        delivered = report.delivered,
                        failed = report.failed,
                        duplicates = report.duplicates,
                        "poll cycle complete"
                    );
                } else {
                    debug!(cycle, "poll cycle complete; nothing eligible");
                }
            }
            CycleOutcome::Aborted(reason) => {
                error!(cycle, %reason, "poll cycle aborted");
            }
            CycleOutcome::StoreUnavailable(_) => {}
        }
    }
}
