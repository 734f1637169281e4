//! Feed executor integration tests
//!
//! Covers one polling cycle end to end against the in-memory store:
//! 1. Sent-event bookkeeping and redelivery after upstream edits
//! 2. Retry and failure classification
//! 3. Client-side filters
//! 4. Delivery failure policy

use std::sync::Arc;

use eventfeed::audit::{ActionType, LogLevel, StoreAuditSink};
use eventfeed::clock::ManualClock;
use eventfeed::models::{ExecutionResult, Feed};
use eventfeed::scheduler::{FeedExecutor, FEED_NOT_FOUND};
use eventfeed::source::SourceError;
use eventfeed::storage::{FeedStore, MemoryStore};
use eventfeed::utils::retry::is_transient_message;

use crate::common::*;

struct Harness {
    store: Arc<MemoryStore>,
    source: Arc<ScriptedSource>,
    delivery: Arc<RecordingDelivery>,
    executor: FeedExecutor,
}

async fn harness(feed: Feed, source: ScriptedSource, max_retries: u32) -> Harness {
    let clock = Arc::new(ManualClock::new(reference_now()));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    store.save(&feed).await.unwrap();

    let source = Arc::new(source);
    let delivery = Arc::new(RecordingDelivery::new());
    let executor = FeedExecutor::new(store.clone(), source.clone(), delivery.clone())
        .with_clock(clock)
        .with_retry(fast_retry(max_retries))
        .with_audit(Arc::new(StoreAuditSink::new(store.clone())));

    Harness {
        store,
        source,
        delivery,
        executor,
    }
}

async fn run(h: &Harness, id: &str) -> ExecutionResult {
    h.executor.execute(id).await
}

// ============================================================================
// Sent-event bookkeeping
// ============================================================================

#[tokio::test]
async fn test_every_returned_event_is_marked() {
    let events = vec![create_test_event(1), event_updated(2, "2024-06-02T09:00:00+09:00")];
    let h = harness(create_test_feed("f1"), ScriptedSource::returning(events.clone()), 0).await;

    let result = run(&h, "f1").await;
    assert_eq!(result, ExecutionResult::success("f1", 2, 2));

    let feed = h.store.get("f1").await.unwrap().unwrap();
    for event in &events {
        assert_eq!(feed.state.sent_updated_at(event.id), Some(event.updated_at.as_str()));
    }
    assert_eq!(feed.state.last_run_at, Some(reference_now().timestamp_millis()));
}

#[tokio::test]
async fn test_unchanged_upstream_yields_no_new_events() {
    let events = vec![create_test_event(1), create_test_event(2)];
    let h = harness(create_test_feed("f1"), ScriptedSource::returning(events), 0).await;

    assert_eq!(run(&h, "f1").await.new_count, 2);
    let second = run(&h, "f1").await;
    assert_eq!(second.total, 2);
    assert_eq!(second.new_count, 0);
    assert_eq!(h.delivery.feed_batches().len(), 1);
}

#[tokio::test]
async fn test_edited_event_is_redelivered() {
    let source = ScriptedSource::new();
    source.push_ok(vec![create_test_event(1), create_test_event(2)]);
    source.push_ok(vec![
        create_test_event(1),
        event_updated(2, "2024-06-10T08:00:00+09:00"),
    ]);
    let h = harness(create_test_feed("f1"), source, 0).await;

    run(&h, "f1").await;
    let result = run(&h, "f1").await;

    assert_eq!(result.new_count, 1);
    assert_eq!(h.delivery.delivered_ids(), vec![1, 2, 2]);
    let feed = h.store.get("f1").await.unwrap().unwrap();
    assert_eq!(feed.state.sent_updated_at(2), Some("2024-06-10T08:00:00+09:00"));
}

#[tokio::test]
async fn test_delivery_carries_feed_destination() {
    let h = harness(
        create_test_feed("f1"),
        ScriptedSource::returning(vec![create_test_event(7)]),
        0,
    )
    .await;

    run(&h, "f1").await;
    let batches = h.delivery.feed_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].feed_id, "f1");
    assert_eq!(batches[0].channel_id, "channel-f1");
}

#[tokio::test]
async fn test_search_window_starts_today() {
    let mut feed = create_test_feed("f1");
    feed.config.range_days = 3;
    feed.config.keywords_and = vec!["rust".to_string()];
    let h = harness(feed, ScriptedSource::new(), 0).await;

    run(&h, "f1").await;
    let params = h.source.last_params().unwrap();
    let today = chrono::NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
    assert_eq!(params.from, Some(today));
    assert_eq!(params.to, chrono::NaiveDate::from_ymd_opt(2024, 6, 18));
    assert_eq!(params.keywords_and, vec!["rust".to_string()]);
}

#[tokio::test]
async fn test_missing_feed() {
    let h = harness(create_test_feed("f1"), ScriptedSource::new(), 0).await;

    let result = run(&h, "nope").await;
    assert_eq!(result.total, 0);
    assert_eq!(result.new_count, 0);
    assert_eq!(result.error.as_deref(), Some(FEED_NOT_FOUND));
    assert_eq!(h.source.calls(), 0);
}

// ============================================================================
// Retry and classification
// ============================================================================

#[test]
fn test_error_classification_table() {
    for message in [
        "ECONNRESET",
        "ECONNREFUSED",
        "ETIMEDOUT",
        "503 Service Unavailable",
        "429 Too Many Requests",
    ] {
        assert!(is_transient_message(message), "{message} should be retryable");
    }
    for message in ["401 Unauthorized", "404 Not Found", "400 Bad Request"] {
        assert!(!is_transient_message(message), "{message} should not be retryable");
    }
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let source = ScriptedSource::new();
    source.push_err(SourceError::other("ECONNRESET"));
    source.push_err(SourceError::other("503 Service Unavailable"));
    source.push_ok(vec![create_test_event(1)]);
    let h = harness(create_test_feed("f1"), source, 3).await;

    let result = run(&h, "f1").await;
    assert_eq!(h.source.calls(), 3);
    assert!(!result.is_error());
    assert_eq!(result.new_count, 1);
}

#[tokio::test]
async fn test_retries_exhausted_reports_last_error() {
    let source = ScriptedSource::new();
    source.push_err(SourceError::other("ECONNRESET"));
    source.push_err(SourceError::other("ECONNRESET"));
    source.push_err(SourceError::other("ETIMEDOUT"));
    let h = harness(create_test_feed("f1"), source, 2).await;

    let result = run(&h, "f1").await;
    assert_eq!(h.source.calls(), 3);
    assert_eq!(result.error.as_deref(), Some("ETIMEDOUT"));
    assert_eq!(result.total, 0);
}

#[tokio::test]
async fn test_permanent_error_fails_fast_without_state_change() {
    let source = ScriptedSource::new();
    source.push_err(SourceError::Status {
        status: 401,
        reason: "Unauthorized".to_string(),
    });
    let h = harness(create_test_feed("f1"), source, 3).await;

    let result = run(&h, "f1").await;
    assert_eq!(h.source.calls(), 1);
    assert_eq!(result.error.as_deref(), Some("HTTP 401 Unauthorized"));

    let feed = h.store.get("f1").await.unwrap().unwrap();
    assert_eq!(feed.state.last_run_at, None);
    assert!(feed.state.sent_events.is_empty());
}

// ============================================================================
// Filters
// ============================================================================

#[tokio::test]
async fn test_hashtag_filter() {
    let mut feed = create_test_feed("f1");
    feed.config.hashtag = Some("ts".to_string());
    let events = vec![event_tagged(1, "ts"), event_tagged(2, "js")];
    let h = harness(feed, ScriptedSource::returning(events), 0).await;

    let result = run(&h, "f1").await;
    assert_eq!(result.total, 1);
    assert_eq!(h.delivery.delivered_ids(), vec![1]);
}

#[tokio::test]
async fn test_min_participant_filter() {
    let mut feed = create_test_feed("f1");
    feed.config.min_participant_count = Some(30);
    let events = vec![event_sized(1, 50, Some(100)), event_sized(2, 20, Some(100))];
    let h = harness(feed, ScriptedSource::returning(events), 0).await;

    let result = run(&h, "f1").await;
    assert_eq!(result.total, 1);
    assert_eq!(h.delivery.delivered_ids(), vec![1]);

    // Filtered-out events are not marked either.
    let feed = h.store.get("f1").await.unwrap().unwrap();
    assert!(feed.state.sent_updated_at(2).is_none());
}

#[tokio::test]
async fn test_min_size_filter_is_a_union() {
    let mut feed = create_test_feed("f1");
    feed.config.min_participant_count = Some(30);
    feed.config.min_limit = Some(100);
    let events = vec![
        event_sized(1, 5, None),       // unbounded capacity
        event_sized(2, 40, Some(20)),  // enough participants
        event_sized(3, 5, Some(20)),   // neither
    ];
    let h = harness(feed, ScriptedSource::returning(events), 0).await;

    let result = run(&h, "f1").await;
    assert_eq!(result.total, 2);
    assert_eq!(h.delivery.delivered_ids(), vec![1, 2]);
}

// ============================================================================
// Delivery failure
// ============================================================================

#[tokio::test]
async fn test_delivery_failure_keeps_state_for_redelivery() {
    let h = harness(
        create_test_feed("f1"),
        ScriptedSource::returning(vec![create_test_event(1)]),
        0,
    )
    .await;

    h.delivery.set_failing(true);
    let failed = run(&h, "f1").await;
    assert!(failed.is_error());
    assert!(failed.error.unwrap().contains("destination offline"));

    let feed = h.store.get("f1").await.unwrap().unwrap();
    assert!(feed.state.sent_events.is_empty());

    h.delivery.set_failing(false);
    let retried = run(&h, "f1").await;
    assert_eq!(retried.new_count, 1);
    assert_eq!(h.delivery.delivered_ids(), vec![1]);
}

#[tokio::test]
async fn test_store_failure_is_reported() {
    let h = harness(create_test_feed("f1"), ScriptedSource::new(), 0).await;
    h.store.set_unavailable(true);

    let result = run(&h, "f1").await;
    assert!(result.error.unwrap().contains("unavailable"));
}

#[tokio::test]
async fn test_execution_is_audited() {
    let source = ScriptedSource::new();
    source.push_ok(vec![create_test_event(1)]);
    source.push_err(SourceError::other("404 Not Found"));
    let h = harness(create_test_feed("f1"), source, 0).await;

    run(&h, "f1").await;
    run(&h, "f1").await;

    let logs = h.store.action_logs();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.action == ActionType::FeedExecute));
    assert!(logs.iter().all(|l| l.feed_id.as_deref() == Some("f1")));
    assert_eq!(logs[0].level, LogLevel::Info);
    assert_eq!(logs[1].level, LogLevel::Error);
    assert_eq!(logs[1].error.as_deref(), Some("404 Not Found"));
}
