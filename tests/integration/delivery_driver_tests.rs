//! Integration tests for `DeliveryDriver` against a real in-memory ledger.
//!
//! Covers per-recipient isolation, batch aborts on ledger and credential
//! failures, send timeouts and the single rate-limit retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use followup_bot::engine::clock::ManualClock;
use followup_bot::engine::driver::{DeliveryDriver, DeliveryReport};
use followup_bot::engine::selector::EligibleRecipient;
use followup_bot::engine::DeliveryOutcome;
use followup_bot::models::ledger::DeliveryStatus;
use followup_bot::models::recipient::RecipientId;
use followup_bot::AppError;

use super::test_helpers::{memory_store, t0, test_settings, FlakyStore, RecordingNotifier, Scripted, MESSAGE};

fn eligible(ids: &[i64]) -> Vec<EligibleRecipient> {
    ids.iter()
        .enumerate()
        .map(|(index, id)| EligibleRecipient {
            entity_id: i64::try_from(index).unwrap() + 1,
            recipient_id: RecipientId::from(*id),
            created_at: t0(),
        })
        .collect()
}

#[tokio::test]
async fn one_failure_does_not_stop_the_batch() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::new();
    notifier.script(
        2,
        vec![Scripted::Outcome(DeliveryOutcome::Failed(
            "Forbidden: bot was blocked by the user".into(),
        ))],
    );
    let driver = DeliveryDriver::new(
        store.clone(),
        notifier.clone(),
        Arc::new(ManualClock::new(t0())),
        &test_settings(10),
    );

    let report = driver.deliver(&eligible(&[1, 2, 3])).await.expect("deliver");

    assert_eq!(
        report,
        DeliveryReport {
            attempted: 3,
            delivered: 2,
            failed: 1,
            duplicates: 0
        }
    );
    assert_eq!(notifier.sent_to(), vec!["1", "2", "3"]);
    assert!(notifier.texts().iter().all(|text| text == MESSAGE));

    let failed = store
        .ledger()
        .get_by_recipient(&RecipientId::from(2))
        .await
        .expect("get")
        .expect("entry");
    assert_eq!(failed.status, DeliveryStatus::Failed);
    assert_eq!(
        failed.failure_reason.as_deref(),
        Some("Forbidden: bot was blocked by the user")
    );
    assert_eq!(failed.sent_at, t0());

    for ok in [1, 3] {
        let entry = store
            .ledger()
            .get_by_recipient(&RecipientId::from(ok))
            .await
            .expect("get")
            .expect("entry");
        assert_eq!(entry.status, DeliveryStatus::Success);
        assert!(entry.failure_reason.is_none());
    }
}

#[tokio::test]
async fn empty_batch_sends_nothing() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::new();
    let driver = DeliveryDriver::new(
        store.clone(),
        notifier.clone(),
        Arc::new(ManualClock::new(t0())),
        &test_settings(10),
    );

    let report = driver.deliver(&[]).await.expect("deliver");
    assert_eq!(report, DeliveryReport::default());
    assert!(notifier.sent_to().is_empty());
}

#[tokio::test]
async fn transport_error_is_recorded_as_failed() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::new();
    notifier.script(1, vec![Scripted::Transport]);
    let driver = DeliveryDriver::new(
        store.clone(),
        notifier,
        Arc::new(ManualClock::new(t0())),
        &test_settings(10),
    );

    let report = driver.deliver(&eligible(&[1])).await.expect("deliver");
    assert_eq!(report.failed, 1);

    let entry = store
        .ledger()
        .get_by_recipient(&RecipientId::from(1))
        .await
        .expect("get")
        .expect("entry");
    assert_eq!(entry.status, DeliveryStatus::Failed);
    assert!(entry
        .failure_reason
        .as_deref()
        .is_some_and(|reason| reason.contains("connection reset")));
}

#[tokio::test]
async fn hanging_send_times_out_as_failed() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::new();
    notifier.script(1, vec![Scripted::Hang]);
    let driver = DeliveryDriver::new(
        store.clone(),
        notifier.clone(),
        Arc::new(ManualClock::new(t0())),
        &test_settings(10),
    );

    let started = std::time::Instant::now();
    let report = driver.deliver(&eligible(&[1, 2])).await.expect("deliver");

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, 1);
    let entry = store
        .ledger()
        .get_by_recipient(&RecipientId::from(1))
        .await
        .expect("get")
        .expect("entry");
    assert!(entry
        .failure_reason
        .as_deref()
        .is_some_and(|reason| reason.starts_with("send timed out")));
}

#[tokio::test]
async fn ledger_write_failure_aborts_remaining_recipients() {
    let inner = memory_store().await;
    let store = FlakyStore::new(inner.clone());
    store.fail_inserts_after(1);
    let notifier = RecordingNotifier::new();
    let driver = DeliveryDriver::new(
        store,
        notifier.clone(),
        Arc::new(ManualClock::new(t0())),
        &test_settings(10),
    );

    let err = driver
        .deliver(&eligible(&[1, 2, 3]))
        .await
        .expect_err("write failure aborts");

    assert!(matches!(err, AppError::Db(_)));
    // Recipient 2 was sent but not recorded; 3 was never reached.
    assert_eq!(notifier.sent_to(), vec!["1", "2"]);
    assert_eq!(inner.ledger().count().await.expect("count"), 1);
    assert!(inner
        .ledger()
        .get_by_recipient(&RecipientId::from(2))
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn rejected_credentials_abort_without_ledger_writes() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::new();
    notifier.script(1, vec![Scripted::Unauthorized]);
    let driver = DeliveryDriver::new(
        store.clone(),
        notifier.clone(),
        Arc::new(ManualClock::new(t0())),
        &test_settings(10),
    );

    let err = driver
        .deliver(&eligible(&[1, 2]))
        .await
        .expect_err("unauthorized aborts");

    assert!(matches!(err, AppError::Unauthorized(_)));
    assert_eq!(notifier.sent_to(), vec!["1"]);
    assert_eq!(store.ledger().count().await.expect("count"), 0);
}

#[tokio::test]
async fn rate_limited_send_is_retried_once() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::new();
    notifier.script(
        1,
        vec![Scripted::Outcome(DeliveryOutcome::RateLimited {
            retry_after: Duration::from_millis(10),
        })],
    );
    let driver = DeliveryDriver::new(
        store.clone(),
        notifier.clone(),
        Arc::new(ManualClock::new(t0())),
        &test_settings(10),
    );

    let report = driver.deliver(&eligible(&[1])).await.expect("deliver");

    assert_eq!(report.delivered, 1);
    assert_eq!(notifier.sent_to(), vec!["1", "1"]);
}

#[tokio::test]
async fn persistent_rate_limit_is_recorded_as_failed() {
    let store = memory_store().await;
    let notifier = RecordingNotifier::new();
    let limited = Scripted::Outcome(DeliveryOutcome::RateLimited {
        retry_after: Duration::from_millis(10),
    });
    notifier.script(1, vec![limited.clone(), limited]);
    let driver = DeliveryDriver::new(
        store.clone(),
        notifier.clone(),
        Arc::new(ManualClock::new(t0())),
        &test_settings(10),
    );

    let report = driver.deliver(&eligible(&[1])).await.expect("deliver");

    assert_eq!(report.failed, 1);
    let entry = store
        .ledger()
        .get_by_recipient(&RecipientId::from(1))
        .await
        .expect("get")
        .expect("entry");
    assert_eq!(entry.failure_reason.as_deref(), Some("rate limited"));
}

#[tokio::test]
async fn concurrent_writer_is_counted_as_duplicate() {
    let store = memory_store().await;
    store
        .ledger()
        .insert(&followup_bot::models::ledger::LedgerEntry::success(
            RecipientId::from(1),
            Utc::now(),
        ))
        .await
        .expect("pre-existing entry");
    let notifier = RecordingNotifier::new();
    let driver = DeliveryDriver::new(
        store.clone(),
        notifier,
        Arc::new(ManualClock::new(t0())),
        &test_settings(10),
    );

    let report = driver.deliver(&eligible(&[1])).await.expect("deliver");

    assert_eq!(report.duplicates, 1);
    assert_eq!(store.ledger().count().await.expect("count"), 1);
}

// ─── Pacing ──────────────────────────────────────────────────────────

fn paced_driver(
    store: Arc<followup_bot::persistence::store::SqliteStore>,
    notifier: Arc<RecordingNotifier>,
    pacing: Duration,
) -> DeliveryDriver {
    let mut settings = test_settings(10);
    settings.send_pacing = pacing;
    DeliveryDriver::new(store, notifier, Arc::new(ManualClock::new(t0())), &settings)
}

#[tokio::test]
async fn pacing_sits_between_sends_only() {
    let pacing = Duration::from_millis(100);
    let notifier = RecordingNotifier::new();
    let driver = paced_driver(memory_store().await, notifier.clone(), pacing);

    let started = std::time::Instant::now();
    let report = driver.deliver(&eligible(&[1, 2, 3])).await.expect("deliver");
    let elapsed = started.elapsed();

    assert_eq!(report.delivered, 3);
    assert!(elapsed >= pacing * 2, "expected two pauses, took {elapsed:?}");
    assert!(elapsed < pacing * 3, "paused after the last send, took {elapsed:?}");
}

#[tokio::test]
async fn single_recipient_is_not_paced() {
    let pacing = Duration::from_millis(300);
    let notifier = RecordingNotifier::new();
    let driver = paced_driver(memory_store().await, notifier.clone(), pacing);

    let started = std::time::Instant::now();
    driver.deliver(&eligible(&[1])).await.expect("deliver");

    assert!(started.elapsed() < pacing, "single send must not sleep");
    assert_eq!(notifier.sent_to(), vec!["1"]);
}
