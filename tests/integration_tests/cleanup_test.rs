//! Retention sweep integration tests

use std::sync::Arc;
use std::time::Duration;

use eventfeed::audit::{ActionLog, ActionType, AppLogEntry, LogLevel, StoreAuditSink};
use eventfeed::clock::ManualClock;
use eventfeed::models::{NotifySentRecord, SentMark};
use eventfeed::scheduler::{CleanupConfig, CleanupReport, CleanupScheduler, CleanupStores};
use eventfeed::storage::{FeedStore, LogStore, MemoryStore, SummaryCacheStore};

use crate::common::*;

fn days_ago(days: i64) -> chrono::DateTime<chrono::Utc> {
    reference_now() - chrono::Duration::days(days)
}

fn app_log(at: chrono::DateTime<chrono::Utc>) -> AppLogEntry {
    AppLogEntry {
        level: LogLevel::Warn,
        target: "eventfeed::scheduler".to_string(),
        message: "slow upstream".to_string(),
        context: None,
        at,
    }
}

/// Store holding exactly one expired row per category under default retention
async fn seeded_store() -> (Arc<ManualClock>, Arc<MemoryStore>) {
    let clock = Arc::new(ManualClock::new(days_ago(40)));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));

    // Summary written 40 days ago, another one today.
    store.put_summary(1, "v1", "old summary").await.unwrap();
    clock.set(reference_now());
    store.put_summary(2, "v1", "fresh summary").await.unwrap();

    store.append_app_log(&app_log(days_ago(10))).await.unwrap();
    store.append_app_log(&app_log(days_ago(1))).await.unwrap();

    let action = |at: chrono::DateTime<chrono::Utc>| {
        ActionLog::new(ActionType::FeedExecute, "executed").at(at)
    };
    store.append_action_log(&action(days_ago(40))).await.unwrap();
    store.append_action_log(&action(days_ago(10))).await.unwrap();

    let mut feed = create_test_feed("f1");
    for (id, age) in [(1u64, 100i64), (2, 10)] {
        feed.state.sent_events.insert(
            id,
            SentMark {
                updated_at: "v1".to_string(),
                marked_at: days_ago(age).timestamp_millis(),
            },
        );
    }
    store.save(&feed).await.unwrap();

    for (event_id, age) in [(1u64, 40i64), (2, 0)] {
        store
            .insert_sent_record(NotifySentRecord {
                user_id: "u1".to_string(),
                event_id,
                notified_at: days_ago(age),
            })
            .unwrap();
    }

    (clock, store)
}

fn all_stores(store: &Arc<MemoryStore>) -> CleanupStores {
    CleanupStores::default()
        .with_logs(store.clone())
        .with_feeds(store.clone())
        .with_summaries(store.clone())
        .with_notify_sent(store.clone())
}

#[tokio::test]
async fn test_sweep_counts_every_category() {
    let (_clock, store) = seeded_store().await;
    let scheduler = CleanupScheduler::new(CleanupConfig::default(), all_stores(&store));

    let report = scheduler.run_cleanup().await.unwrap();
    assert_eq!(
        report,
        CleanupReport {
            app_logs: 1,
            action_logs: 1,
            feed_sent_events: 1,
            summary_cache: 1,
            notify_sent: 1,
            total_deleted: 5,
        }
    );

    let feed = store.get("f1").await.unwrap().unwrap();
    assert!(feed.state.sent_updated_at(2).is_some());
    assert_eq!(store.get_summary(2, "v1").await.unwrap().as_deref(), Some("fresh summary"));

    // Nothing left to delete.
    assert_eq!(scheduler.run_cleanup().await.unwrap().total_deleted, 0);
}

#[tokio::test]
async fn test_absent_stores_contribute_zero() {
    let (_clock, store) = seeded_store().await;
    let stores = CleanupStores::default().with_logs(store.clone());
    let scheduler = CleanupScheduler::new(CleanupConfig::default(), stores);

    let report = scheduler.run_cleanup().await.unwrap();
    assert_eq!(report.app_logs, 1);
    assert_eq!(report.action_logs, 1);
    assert_eq!(report.feed_sent_events, 0);
    assert_eq!(report.summary_cache, 0);
    assert_eq!(report.notify_sent, 0);
    assert_eq!(report.total_deleted, 2);
    assert_eq!(store.sent_records().len(), 2);
}

#[tokio::test]
async fn test_retention_is_configurable() {
    let (_clock, store) = seeded_store().await;
    let config = CleanupConfig {
        app_log_days: 30,
        feed_sent_event_days: 5,
        ..Default::default()
    };
    let scheduler = CleanupScheduler::new(config, all_stores(&store));

    let report = scheduler.run_cleanup().await.unwrap();
    assert_eq!(report.app_logs, 0);
    assert_eq!(report.feed_sent_events, 2);
}

#[tokio::test]
async fn test_store_failure_aborts_remaining_categories() {
    let (_clock, healthy) = seeded_store().await;
    let broken = Arc::new(MemoryStore::new());
    broken.set_unavailable(true);

    let stores = CleanupStores::default()
        .with_logs(healthy.clone())
        .with_feeds(broken)
        .with_notify_sent(healthy.clone());
    let scheduler = CleanupScheduler::new(CleanupConfig::default(), stores);

    let err = scheduler.run_cleanup().await.unwrap_err();
    assert!(format!("{err:#}").contains("feed sent-event cleanup failed"));

    // Logs were swept before the failure, reminder records were not.
    assert_eq!(healthy.app_logs().len(), 1);
    assert_eq!(healthy.sent_records().len(), 2);
}

#[tokio::test]
async fn test_tick_swallows_and_audits_failure() {
    let audit_store = Arc::new(MemoryStore::new());
    let broken = Arc::new(MemoryStore::new());
    broken.set_unavailable(true);

    let scheduler = CleanupScheduler::new(
        CleanupConfig::default(),
        CleanupStores::default().with_logs(broken),
    )
    .with_audit(Arc::new(StoreAuditSink::new(audit_store.clone())));

    assert!(scheduler.tick().await.is_none());
    let logs = audit_store.action_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, ActionType::Cleanup);
    assert_eq!(logs[0].level, LogLevel::Error);
}

#[tokio::test]
async fn test_start_sweeps_immediately() {
    let (_clock, store) = seeded_store().await;
    let scheduler = Arc::new(CleanupScheduler::new(CleanupConfig::default(), all_stores(&store)));

    assert!(scheduler.start().await);
    assert!(!scheduler.start().await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(store.sent_records().len(), 1);
    assert_eq!(store.app_logs().len(), 1);
    assert!(scheduler.stop().await);
}
