//! Reminder scheduler integration tests
//!
//! Tests the notify window, sent-record idempotence, per-user isolation,
//! the day cache and the sent-record sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use eventfeed::audit::{ActionType, StoreAuditSink};
use eventfeed::clock::ManualClock;
use eventfeed::models::{NotifySentRecord, User, UserNotifySettings};
use eventfeed::scheduler::{NotifyScheduler, NotifyStores};
use eventfeed::storage::{MemoryStore, UserNotifySentStore, UserNotifySettingsStore, UserStore};

use crate::common::*;

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    source: Arc<CalendarSource>,
    delivery: Arc<RecordingDelivery>,
    scheduler: NotifyScheduler,
}

fn harness_at(now: chrono::DateTime<chrono::Utc>) -> Harness {
    build_harness(now, Duration::ZERO, memory_sent)
}

fn build_harness(
    now: chrono::DateTime<chrono::Utc>,
    user_delay: Duration,
    sent: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn UserNotifySentStore>,
) -> Harness {
    let clock = Arc::new(ManualClock::new(now));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let source = Arc::new(CalendarSource::new());
    let delivery = Arc::new(RecordingDelivery::new());

    let stores = NotifyStores {
        settings: store.clone(),
        users: store.clone(),
        sent: sent(store.clone()),
    };
    let scheduler = NotifyScheduler::new(stores, source.clone(), delivery.clone())
        .with_clock(clock.clone())
        .with_audit(Arc::new(StoreAuditSink::new(store.clone())))
        .with_user_delay(user_delay);

    Harness {
        clock,
        store,
        source,
        delivery,
        scheduler,
    }
}

fn memory_sent(store: Arc<MemoryStore>) -> Arc<dyn UserNotifySentStore> {
    store
}

/// Sent-record store whose writes fail for one event while `failing` is set
struct FlakySentStore {
    inner: Arc<MemoryStore>,
    event_id: u64,
    failing: Arc<AtomicBool>,
}

#[async_trait]
impl UserNotifySentStore for FlakySentStore {
    async fn mark_sent(&self, user_id: &str, event_id: u64) -> anyhow::Result<()> {
        if event_id == self.event_id && self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        UserNotifySentStore::mark_sent(self.inner.as_ref(), user_id, event_id).await
    }

    async fn get_sent_event_ids(&self, user_id: &str) -> anyhow::Result<Vec<u64>> {
        UserNotifySentStore::get_sent_event_ids(self.inner.as_ref(), user_id).await
    }

    async fn cleanup_older_than(&self, days: u32) -> anyhow::Result<u64> {
        UserNotifySentStore::cleanup_older_than(self.inner.as_ref(), days).await
    }
}

async fn add_user(store: &MemoryStore, user_id: &str, nickname: &str, minutes_before: u32) {
    UserStore::save(
        store,
        &User {
            discord_user_id: user_id.to_string(),
            nickname: nickname.to_string(),
        },
    )
    .await
    .unwrap();
    UserNotifySettingsStore::save(store, &UserNotifySettings::enabled(user_id, minutes_before))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_window_selects_upcoming_event_once() {
    let h = harness_at(reference_now());
    add_user(&h.store, "u1", "alice", 15).await;
    h.source.add("alice", event_starting(1, "2024-06-15T10:10:00+09:00"));
    h.source.add("alice", event_starting(2, "2024-06-15T11:00:00+09:00"));
    h.source.add("alice", event_starting(3, "2024-06-15T09:50:00+09:00"));

    let report = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.users, 1);
    assert_eq!(report.events_sent, 1);
    assert_eq!(h.delivery.reminders(), vec![("u1".to_string(), vec![1])]);

    let again = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(again.events_sent, 0);
    assert_eq!(h.delivery.reminders().len(), 1);
}

#[tokio::test]
async fn test_window_far_edge_is_inclusive() {
    let h = harness_at(reference_now());
    add_user(&h.store, "u1", "alice", 15).await;
    h.source.add("alice", event_starting(1, "2024-06-15T10:15:00+09:00"));
    h.source.add("alice", event_starting(2, "2024-06-15T10:00:00+09:00"));

    h.scheduler.run_cycle().await.unwrap();
    assert_eq!(h.delivery.reminders(), vec![("u1".to_string(), vec![1])]);
}

#[tokio::test]
async fn test_window_crossing_midnight_fetches_tomorrow() {
    let h = harness_at(tokyo(2024, 6, 15, 23, 50));
    add_user(&h.store, "u1", "alice", 30).await;
    h.source.add("alice", event_starting(1, "2024-06-16T00:10:00+09:00"));
    h.source.add("alice", event_starting(2, "2024-06-16T01:00:00+09:00"));

    h.scheduler.run_cycle().await.unwrap();

    let days: Vec<NaiveDate> = h.source.requested_days().into_iter().map(|(_, d)| d).collect();
    assert_eq!(
        days,
        vec![
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 16).unwrap(),
        ]
    );
    assert_eq!(h.delivery.reminders(), vec![("u1".to_string(), vec![1])]);
}

#[tokio::test]
async fn test_same_day_window_fetches_only_today() {
    let h = harness_at(reference_now());
    add_user(&h.store, "u1", "alice", 60).await;

    h.scheduler.run_cycle().await.unwrap();
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test]
async fn test_day_cache_expires_after_ttl() {
    let h = harness_at(reference_now());
    add_user(&h.store, "u1", "alice", 15).await;

    h.scheduler.run_cycle().await.unwrap();
    h.clock.advance(chrono::Duration::minutes(10));
    h.scheduler.run_cycle().await.unwrap();
    assert_eq!(h.source.calls(), 1);
    assert_eq!(h.scheduler.cached_days(), 1);

    h.clock.advance(chrono::Duration::minutes(25));
    h.scheduler.run_cycle().await.unwrap();
    assert_eq!(h.source.calls(), 2);
}

#[tokio::test]
async fn test_user_without_profile_is_skipped() {
    let h = harness_at(reference_now());
    UserNotifySettingsStore::save(h.store.as_ref(), &UserNotifySettings::enabled("ghost", 15))
        .await
        .unwrap();
    add_user(&h.store, "u1", "alice", 15).await;
    h.source.add("alice", event_starting(1, "2024-06-15T10:05:00+09:00"));

    let report = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.users, 2);
    assert_eq!(report.skipped_users, 1);
    assert_eq!(report.notified_users, 1);
}

#[tokio::test]
async fn test_failing_user_does_not_abort_cycle() {
    let h = harness_at(reference_now());
    add_user(&h.store, "u1", "broken", 15).await;
    add_user(&h.store, "u2", "bob", 15).await;
    h.source.fail_for("broken");
    h.source.add("bob", event_starting(5, "2024-06-15T10:05:00+09:00"));

    let report = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.failed_users, 1);
    assert_eq!(h.delivery.reminders(), vec![("u2".to_string(), vec![5])]);

    let failures: Vec<_> = h
        .store
        .action_logs()
        .into_iter()
        .filter(|l| l.user_id.as_deref() == Some("u1"))
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].action, ActionType::NotifySend);
    assert!(failures[0].error.as_deref().unwrap().contains("500"));

    let checks = h
        .store
        .action_logs()
        .into_iter()
        .filter(|l| l.action == ActionType::NotifyCheck)
        .count();
    assert_eq!(checks, 1);
}

#[tokio::test]
async fn test_delivery_failure_is_retried_next_cycle() {
    let h = harness_at(reference_now());
    add_user(&h.store, "u1", "alice", 15).await;
    h.source.add("alice", event_starting(1, "2024-06-15T10:10:00+09:00"));

    h.delivery.set_failing(true);
    let report = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.failed_users, 1);
    assert!(h.store.sent_records().is_empty());

    h.delivery.set_failing(false);
    let report = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.events_sent, 1);
    assert_eq!(h.store.sent_records().len(), 1);
}

#[tokio::test]
async fn test_sent_record_sweep_runs_only_with_enabled_users() {
    let h = harness_at(reference_now());
    h.store
        .insert_sent_record(NotifySentRecord {
            user_id: "old".to_string(),
            event_id: 99,
            notified_at: reference_now() - chrono::Duration::days(45),
        })
        .unwrap();

    let report = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.users, 0);
    assert_eq!(h.store.sent_records().len(), 1);

    add_user(&h.store, "u1", "alice", 15).await;
    let report = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.cleaned_records, 1);
    assert!(h.store.sent_records().is_empty());
}

#[tokio::test]
async fn test_disabled_users_are_ignored() {
    let h = harness_at(reference_now());
    add_user(&h.store, "u1", "alice", 15).await;
    let mut settings = UserNotifySettings::enabled("u1", 15);
    settings.enabled = false;
    UserNotifySettingsStore::save(h.store.as_ref(), &settings)
        .await
        .unwrap();
    h.source.add("alice", event_starting(1, "2024-06-15T10:10:00+09:00"));

    let report = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.users, 0);
    assert_eq!(h.source.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_user_delay_only_between_users() {
    let h = build_harness(reference_now(), Duration::from_millis(1100), memory_sent);
    add_user(&h.store, "u1", "alice", 15).await;
    add_user(&h.store, "u2", "bob", 15).await;
    add_user(&h.store, "u3", "carol", 15).await;

    let started = tokio::time::Instant::now();
    let report = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.users, 3);
    assert_eq!(started.elapsed(), Duration::from_millis(2200));

    let offsets: Vec<Duration> = h
        .source
        .searched_at()
        .iter()
        .map(|at| at.duration_since(started))
        .collect();
    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_millis(1100),
            Duration::from_millis(2200)
        ]
    );
}

#[tokio::test]
async fn test_failed_record_does_not_stop_the_others() {
    let failing = Arc::new(AtomicBool::new(true));
    let flag = failing.clone();
    let h = build_harness(reference_now(), Duration::ZERO, move |store| {
        let sent: Arc<dyn UserNotifySentStore> = Arc::new(FlakySentStore {
            inner: store,
            event_id: 2,
            failing: flag,
        });
        sent
    });
    add_user(&h.store, "u1", "alice", 15).await;
    h.source.add("alice", event_starting(1, "2024-06-15T10:10:00+09:00"));
    h.source.add("alice", event_starting(2, "2024-06-15T10:05:00+09:00"));
    h.source.add("alice", event_starting(3, "2024-06-15T10:12:00+09:00"));

    let report = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.failed_users, 1);
    assert_eq!(report.events_sent, 0);
    let mut recorded: Vec<u64> = h.store.sent_records().iter().map(|r| r.event_id).collect();
    recorded.sort_unstable();
    assert_eq!(recorded, vec![1, 3]);

    failing.store(false, Ordering::SeqCst);
    let report = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.failed_users, 0);
    assert_eq!(report.events_sent, 1);
    assert_eq!(
        h.delivery.reminders().last(),
        Some(&("u1".to_string(), vec![2]))
    );
}
