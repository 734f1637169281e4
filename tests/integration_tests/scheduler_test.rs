//! Feed scheduler integration tests
//!
//! Tests due-feed selection, rescheduling after every outcome and the
//! periodic driver.

use std::sync::Arc;
use std::time::Duration;

use eventfeed::clock::{Clock, ManualClock};
use eventfeed::models::FeedState;
use eventfeed::scheduler::{FeedExecutor, FeedScheduler};
use eventfeed::source::{EventSource, SourceError};
use eventfeed::storage::{FeedStore, MemoryStore};

use crate::common::*;

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    scheduler: Arc<FeedScheduler>,
}

fn harness_with(source: Arc<dyn EventSource>) -> Harness {
    harness_with_delay(source, Duration::ZERO)
}

fn harness_with_delay(source: Arc<dyn EventSource>, rate_limit_delay: Duration) -> Harness {
    let clock = Arc::new(ManualClock::new(reference_now()));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let delivery = Arc::new(RecordingDelivery::new());

    let executor = Arc::new(
        FeedExecutor::new(store.clone(), source, delivery)
            .with_clock(clock.clone())
            .with_retry(fast_retry(0)),
    );
    let scheduler = Arc::new(
        FeedScheduler::new(store.clone(), executor)
            .with_clock(clock.clone())
            .with_rate_limit_delay(rate_limit_delay),
    );

    Harness {
        clock,
        store,
        scheduler,
    }
}

/// Save a feed whose next run lies `ago_ms` in the past
async fn save_due(store: &MemoryStore, id: &str, ago_ms: i64) {
    let feed = create_test_feed(id).with_state(FeedState {
        next_run_at: Some(reference_now().timestamp_millis() - ago_ms),
        ..Default::default()
    });
    store.save(&feed).await.unwrap();
}

#[tokio::test]
async fn test_due_feed_runs_once_and_moves_forward() {
    let source = Arc::new(ScriptedSource::returning(vec![create_test_event(1)]));
    let h = harness_with(source.clone());
    save_due(&h.store, "f1", 5 * 60 * 1000).await;

    let results = h.scheduler.run_due_feeds().await;
    assert_eq!(results.len(), 1);
    assert_eq!(source.calls(), 1);

    let now_ms = h.clock.now_ms();
    let feed = h.store.get("f1").await.unwrap().unwrap();
    let next = feed.state.next_run_at.unwrap();
    assert!(next > now_ms);
    // "0 * * * *" from 10:00 JST is 11:00 JST
    assert_eq!(next, tokyo(2024, 6, 15, 11, 0).timestamp_millis());

    // Same instant: nothing due any more.
    assert!(h.scheduler.run_due_feeds().await.is_empty());
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_only_due_feeds_run_in_store_order() {
    let source = Arc::new(ScriptedSource::new());
    let h = harness_with(source.clone());

    save_due(&h.store, "b", 1_000).await;
    save_due(&h.store, "future", -60_000).await;
    h.store.save(&create_test_feed("unscheduled")).await.unwrap();
    save_due(&h.store, "a", 0).await;

    let results = h.scheduler.run_due_feeds().await;
    let ids: Vec<&str> = results.iter().map(|r| r.feed_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_delay_only_between_feeds() {
    let source = Arc::new(ScriptedSource::new());
    let h = harness_with_delay(source.clone(), Duration::from_millis(1100));
    save_due(&h.store, "a", 3_000).await;
    save_due(&h.store, "b", 2_000).await;
    save_due(&h.store, "c", 1_000).await;

    let started = tokio::time::Instant::now();
    let results = h.scheduler.run_due_feeds().await;
    assert_eq!(results.len(), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(2200));

    let offsets: Vec<Duration> = source
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
async fn test_failed_feed_is_rescheduled_and_others_still_run() {
    let source = Arc::new(ScriptedSource::new());
    source.push_err(SourceError::Status {
        status: 404,
        reason: "Not Found".to_string(),
    });
    let h = harness_with(source.clone());
    save_due(&h.store, "broken", 1_000).await;
    save_due(&h.store, "healthy", 1_000).await;

    let results = h.scheduler.run_due_feeds().await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].error.as_deref(), Some("HTTP 404 Not Found"));
    assert!(!results[1].is_error());

    for id in ["broken", "healthy"] {
        let feed = h.store.get(id).await.unwrap().unwrap();
        assert!(feed.state.next_run_at.unwrap() > h.clock.now_ms(), "{id} not rescheduled");
    }
}

#[tokio::test]
async fn test_panicking_execution_is_contained_and_rescheduled() {
    let h = harness_with(Arc::new(PanickingSource));
    save_due(&h.store, "f1", 1_000).await;

    let results = h.scheduler.run_due_feeds().await;
    assert_eq!(results.len(), 1);
    assert!(results[0].error.as_deref().unwrap().starts_with("panic"));

    let feed = h.store.get("f1").await.unwrap().unwrap();
    assert!(feed.state.next_run_at.unwrap() > h.clock.now_ms());

    // The scheduler is still usable afterwards.
    h.clock.advance(chrono::Duration::hours(2));
    assert_eq!(h.scheduler.run_due_feeds().await.len(), 1);
}

#[tokio::test]
async fn test_invalid_cron_leaves_feed_unscheduled() {
    let h = harness_with(Arc::new(ScriptedSource::new()));
    let mut feed = create_test_feed("f1");
    feed.config.schedule = "every hour".to_string();
    h.store.save(&feed).await.unwrap();

    assert_eq!(h.scheduler.schedule_feed("f1").await.unwrap(), None);
    let feed = h.store.get("f1").await.unwrap().unwrap();
    assert_eq!(feed.state.next_run_at, None);
    assert!(h.scheduler.run_due_feeds().await.is_empty());
}

#[tokio::test]
async fn test_schedule_and_unschedule() {
    let h = harness_with(Arc::new(ScriptedSource::new()));
    let mut feed = create_test_feed("f1");
    feed.config.schedule = "30 9 * * 1-5".to_string();
    feed.state.last_run_at = Some(42);
    h.store.save(&feed).await.unwrap();

    // Saturday 10:00 JST: next weekday 09:30 is Monday the 17th
    let next = h.scheduler.schedule_feed("f1").await.unwrap();
    assert_eq!(next, Some(tokyo(2024, 6, 17, 9, 30).timestamp_millis()));

    assert!(h.scheduler.unschedule_feed("f1").await.unwrap());
    let feed = h.store.get("f1").await.unwrap().unwrap();
    assert_eq!(feed.state.next_run_at, None);
    assert_eq!(feed.state.last_run_at, Some(42));
    assert_eq!(feed.config.schedule, "30 9 * * 1-5");

    assert!(!h.scheduler.unschedule_feed("missing").await.unwrap());
    assert_eq!(h.scheduler.schedule_feed("missing").await.unwrap(), None);
}

#[tokio::test]
async fn test_overlapping_tick_is_skipped() {
    let source = Arc::new(ScriptedSource::new().with_delay(Duration::from_millis(100)));
    let h = harness_with(source.clone());
    save_due(&h.store, "f1", 1_000).await;

    let (first, second) = tokio::join!(h.scheduler.run_due_feeds(), h.scheduler.run_due_feeds());
    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_start_is_idempotent_and_ticks_immediately() {
    let source = Arc::new(ScriptedSource::new());
    let h = harness_with(source.clone());
    save_due(&h.store, "f1", 1_000).await;

    assert!(h.scheduler.start().await);
    assert!(!h.scheduler.start().await);
    assert!(h.scheduler.is_running());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.calls(), 1);

    assert!(h.scheduler.stop().await);
    assert!(!h.scheduler.stop().await);
    assert!(!h.scheduler.is_running());
}
