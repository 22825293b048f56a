//! Integration tests for single scheduler cycles: selection, delivery and
//! ledger state end to end, plus store failure handling.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use followup_bot::engine::clock::ManualClock;
use followup_bot::engine::scheduler::{CycleOutcome, PollScheduler, SchedulerState};
use followup_bot::engine::DeliveryOutcome;
use followup_bot::models::ledger::DeliveryStatus;
use followup_bot::models::recipient::RecipientId;
use followup_bot::persistence::format_timestamp;

use super::test_helpers::{
    memory_store, memory_store_with_pool, seed, t0, test_settings, FlakyStore, RecordingNotifier, Scripted,
};

#[tokio::test]
async fn eligible_recipient_is_notified_exactly_once() {
    let store = memory_store().await;
    let u1 = RecipientId::parse("u1").expect("valid");
    store
        .entities()
        .register(&u1, None, t0() - ChronoDuration::seconds(15))
        .await
        .expect("seed");
    let notifier = RecordingNotifier::new();
    let clock = Arc::new(ManualClock::new(t0()));
    let scheduler = PollScheduler::new(store.clone(), notifier.clone(), clock.clone(), &test_settings(10));

    let first = scheduler.run_cycle().await;
    match first {
        CycleOutcome::Completed { selected, report, .. } => {
            assert_eq!(selected, 1);
            assert_eq!(report.delivered, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(notifier.sent_to(), vec!["u1"]);
    let entry = store
        .ledger()
        .get_by_recipient(&u1)
        .await
        .expect("get")
        .expect("entry");
    assert_eq!(entry.status, DeliveryStatus::Success);

    clock.advance(ChronoDuration::seconds(1));
    let second = scheduler.run_cycle().await;
    assert!(matches!(second, CycleOutcome::Completed { selected: 0, .. }));
    assert_eq!(notifier.sent_to().len(), 1);
}

#[tokio::test]
async fn recipient_becomes_eligible_when_window_passes() {
    let store = memory_store().await;
    seed(&store, 1, t0()).await;
    let notifier = RecordingNotifier::new();
    let clock = Arc::new(ManualClock::new(t0()));
    let scheduler = PollScheduler::new(store.clone(), notifier.clone(), clock.clone(), &test_settings(10));

    clock.advance(ChronoDuration::seconds(9));
    scheduler.run_cycle().await;
    assert!(notifier.sent_to().is_empty());

    clock.advance(ChronoDuration::seconds(1));
    scheduler.run_cycle().await;
    assert_eq!(notifier.sent_to(), vec!["1"]);
}

#[tokio::test]
async fn failed_recipient_is_never_retried() {
    let store = memory_store().await;
    seed(&store, 1, t0() - ChronoDuration::minutes(1)).await;
    seed(&store, 2, t0() - ChronoDuration::minutes(1)).await;
    seed(&store, 3, t0() - ChronoDuration::minutes(1)).await;
    let notifier = RecordingNotifier::new();
    notifier.script(2, vec![Scripted::Outcome(DeliveryOutcome::Failed("chat not found".into()))]);
    let clock = Arc::new(ManualClock::new(t0()));
    let scheduler = PollScheduler::new(store.clone(), notifier.clone(), clock.clone(), &test_settings(10));

    let outcome = scheduler.run_cycle().await;
    match outcome {
        CycleOutcome::Completed { report, .. } => {
            assert_eq!(report.delivered, 2);
            assert_eq!(report.failed, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    clock.advance(ChronoDuration::minutes(5));
    scheduler.run_cycle().await;
    assert_eq!(notifier.sent_to(), vec!["1", "2", "3"]);
    assert_eq!(store.ledger().count().await.expect("count"), 3);
}

#[tokio::test]
async fn malformed_recipients_are_never_notified_or_recorded() {
    let (pool, store) = memory_store_with_pool().await;
    let created = format_timestamp(t0() - ChronoDuration::minutes(1));
    for value in ["''", "1.25", "'has space'"] {
        sqlx::query(&format!(
            "INSERT INTO entity (recipient_id, created_at) VALUES ({value}, ?1)"
        ))
        .bind(&created)
        .execute(pool.as_ref())
        .await
        .expect("raw insert");
    }
    seed(&store, 9, t0() - ChronoDuration::minutes(1)).await;
    let notifier = RecordingNotifier::new();
    let scheduler = PollScheduler::new(
        store.clone(),
        notifier.clone(),
        Arc::new(ManualClock::new(t0())),
        &test_settings(10),
    );

    let outcome = scheduler.run_cycle().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Completed {
            selected: 1,
            skipped_malformed: 3,
            ..
        }
    ));
    assert_eq!(notifier.sent_to(), vec!["9"]);
    assert_eq!(store.ledger().count().await.expect("count"), 1);
}

#[tokio::test]
async fn offset_less_timestamps_from_other_writers_are_notified() {
    let (pool, store) = memory_store_with_pool().await;
    for (recipient, created_at) in [("'77'", "2026-03-01 11:00:00"), ("'78'", "2026-03-01T13:00:00+02:00")] {
        sqlx::query(&format!(
            "INSERT INTO entity (recipient_id, created_at) VALUES ({recipient}, ?1)"
        ))
        .bind(created_at)
        .execute(pool.as_ref())
        .await
        .expect("raw insert");
    }
    let notifier = RecordingNotifier::new();
    let scheduler = PollScheduler::new(
        store.clone(),
        notifier.clone(),
        Arc::new(ManualClock::new(t0())),
        &test_settings(10),
    );

    let outcome = scheduler.run_cycle().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Completed {
            selected: 2,
            skipped_malformed: 0,
            ..
        }
    ));
    assert_eq!(notifier.sent_to(), vec!["77", "78"]);
}

#[tokio::test]
async fn unreachable_store_skips_the_cycle_and_backs_off() {
    let inner = memory_store().await;
    seed(&inner, 1, t0() - ChronoDuration::minutes(1)).await;
    let store = FlakyStore::new(inner.clone());
    store.set_unreachable(true);
    let notifier = RecordingNotifier::new();
    let settings = test_settings(10);
    let scheduler = PollScheduler::new(
        store.clone(),
        notifier.clone(),
        Arc::new(ManualClock::new(t0())),
        &settings,
    );

    let outcome = scheduler.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::StoreUnavailable(_)));
    assert!(notifier.sent_to().is_empty());
    assert_eq!(inner.ledger().count().await.expect("count"), 0);

    let delay = scheduler.delay_after(&outcome);
    assert!(delay >= settings.store_unavailable_backoff);
    assert!(delay <= settings.store_unavailable_backoff + settings.backoff_jitter);
    assert!(delay > settings.poll_interval);

    store.set_unreachable(false);
    scheduler.run_cycle().await;
    assert_eq!(notifier.sent_to(), vec!["1"]);
}

#[tokio::test]
async fn query_failure_aborts_without_sending() {
    let inner = memory_store().await;
    seed(&inner, 1, t0() - ChronoDuration::minutes(1)).await;
    let store = FlakyStore::new(inner);
    store.set_fail_ledger_reads(true);
    let notifier = RecordingNotifier::new();
    let settings = test_settings(10);
    let scheduler = PollScheduler::new(
        store,
        notifier.clone(),
        Arc::new(ManualClock::new(t0())),
        &settings,
    );

    let outcome = scheduler.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Aborted(_)));
    assert!(notifier.sent_to().is_empty());
    assert_eq!(scheduler.delay_after(&outcome), settings.poll_interval);
}

#[tokio::test]
async fn completed_cycle_waits_the_poll_interval_and_returns_to_idle() {
    let store = memory_store().await;
    let settings = test_settings(10);
    let scheduler = PollScheduler::new(
        store,
        RecordingNotifier::new(),
        Arc::new(ManualClock::new(t0())),
        &settings,
    );
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    let outcome = scheduler.run_cycle().await;

    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert_eq!(scheduler.delay_after(&outcome), Duration::from_millis(20));
}
