//! One polling cycle of a single feed
//!
//! ```text
//! load feed ──► search (retry) ──► hashtag filter ──► min-size filter
//!     ──► new-event detection ──► deliver new ──► persist next state
//! ```
//!
//! The loaded feed is never mutated: [`next_state`] derives the state to
//! persist. State is only written after a successful delivery, so a failed
//! delivery is retried in full on the next run (at-least-once).

use std::sync::Arc;
use std::time::Instant;

use chrono_tz::Tz;

use crate::audit::{ActionLog, ActionType, SharedAuditSink, TracingAuditSink};
use crate::clock::{Clock, SharedClock, SystemClock};
use crate::error::{Error, EventFeedErrorTrait};
use crate::models::{normalize_hashtag, Event, ExecutionResult, FeedConfig, FeedState, SentMark};
use crate::notifications::{DeliveryChannel, FeedDelivery};
use crate::source::{EventSource, SearchParams, SourceError};
use crate::storage::FeedStore;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Error text reported for an unknown feed id
pub const FEED_NOT_FOUND: &str = "Feed not found";

/// Default page size requested from the event source
pub const DEFAULT_PAGE_SIZE: u32 = 100;

// ============================================================================
// Filters
// ============================================================================

/// Keep events whose normalized hashtag equals the normalized `hashtag`
pub fn filter_by_hashtag(events: Vec<Event>, hashtag: &str) -> Vec<Event> {
    let wanted = normalize_hashtag(hashtag);
    events
        .into_iter()
        .filter(|e| e.normalized_hash_tag().as_deref() == Some(wanted.as_str()))
        .collect()
}

/// Union size filter: enough participants OR a large enough capacity
///
/// An unset threshold never passes on its own.
pub fn passes_min_size(event: &Event, min_participants: Option<u32>, min_limit: Option<u32>) -> bool {
    let by_participants = min_participants.is_some_and(|min| event.accepted >= min);
    let by_limit = min_limit.is_some_and(|min| event.effective_limit() >= u64::from(min));
    by_participants || by_limit
}

/// Apply the configured client-side filters in order
pub fn apply_filters(config: &FeedConfig, events: Vec<Event>) -> Vec<Event> {
    let events = match config.hashtag.as_deref() {
        Some(tag) if !normalize_hashtag(tag).is_empty() => filter_by_hashtag(events, tag),
        _ => events,
    };

    if !config.has_size_filter() {
        return events;
    }
    events
        .into_iter()
        .filter(|e| passes_min_size(e, config.min_participant_count, config.min_limit))
        .collect()
}

/// Events never delivered, or whose `updated_at` changed since
pub fn detect_new(state: &FeedState, events: &[Event]) -> Vec<Event> {
    events.iter().filter(|e| state.is_new(e)).cloned().collect()
}

/// State after a successful run: every survivor re-marked, `last_run_at = now`
pub fn next_state(state: &FeedState, survivors: &[Event], now_ms: i64) -> FeedState {
    let mut next = state.clone();
    for event in survivors {
        next.sent_events.insert(
            event.id,
            SentMark {
                updated_at: event.updated_at.clone(),
                marked_at: now_ms,
            },
        );
    }
    next.last_run_at = Some(now_ms);
    next
}

// ============================================================================
// Executor
// ============================================================================

/// Executes fetch-filter-dedup-deliver-persist for one feed
pub struct FeedExecutor {
    store: Arc<dyn FeedStore>,
    source: Arc<dyn EventSource>,
    delivery: Arc<dyn DeliveryChannel>,
    audit: SharedAuditSink,
    clock: SharedClock,
    retry: RetryConfig,
    timezone: Tz,
    page_size: u32,
}

impl FeedExecutor {
    pub fn new(
        store: Arc<dyn FeedStore>,
        source: Arc<dyn EventSource>,
        delivery: Arc<dyn DeliveryChannel>,
    ) -> Self {
        Self {
            store,
            source,
            delivery,
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
            retry: RetryConfig::default(),
            timezone: chrono_tz::Asia::Tokyo,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Timezone that defines "today" for the search window
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Run one cycle; failures are reported in [`ExecutionResult::error`]
    pub async fn execute(&self, feed_id: &str) -> ExecutionResult {
        let started = Instant::now();
        let result = match self.run(feed_id).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    feed_id = %feed_id,
                    category = e.category().as_str(),
                    recoverable = e.is_recoverable(),
                    error = %e,
                    "Feed execution failed"
                );
                ExecutionResult::failure(feed_id, failure_message(&e))
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let entry = match &result.error {
            Some(error) => ActionLog::new(ActionType::FeedExecute, "Feed execution failed")
                .with_error(error.clone()),
            None => ActionLog::new(
                ActionType::FeedExecute,
                format!(
                    "Feed executed: {} events, {} new",
                    result.total, result.new_count
                ),
            ),
        };
        self.audit
            .record(
                entry
                    .with_feed(feed_id)
                    .with_duration_ms(duration_ms)
                    .at(self.clock.now()),
            )
            .await;

        result
    }

    async fn run(&self, feed_id: &str) -> Result<ExecutionResult, Error> {
        let Some(feed) = self.store.get(feed_id).await? else {
            tracing::warn!(feed_id = %feed_id, "Feed not found");
            return Ok(ExecutionResult::failure(feed_id, FEED_NOT_FOUND));
        };

        let now = self.clock.now();
        let today = now.with_timezone(&self.timezone).date_naive();
        let params = SearchParams::for_feed(&feed.config, today, self.page_size);

        let response = with_retry_if(
            &self.retry,
            || self.source.search(&params),
            SourceError::is_recoverable,
        )
        .await?;
        let fetched = response.events.len();

        let survivors = apply_filters(&feed.config, response.events);
        let new_events = detect_new(&feed.state, &survivors);

        tracing::debug!(
            feed_id = %feed_id,
            fetched,
            survivors = survivors.len(),
            new = new_events.len(),
            "Feed events filtered"
        );

        if !new_events.is_empty() {
            let delivery = FeedDelivery {
                feed_id: feed.config.id.clone(),
                channel_id: feed.config.channel_id.clone(),
                events: new_events.clone(),
            };
            self.delivery.handle_new_events(&delivery).await?;
        }

        let state = next_state(&feed.state, &survivors, now.timestamp_millis());
        self.store.save(&feed.with_state(state)).await?;

        Ok(ExecutionResult::success(
            feed_id,
            survivors.len(),
            new_events.len(),
        ))
    }
}

/// Message of the underlying failure, without the unified-error prefix
fn failure_message(error: &Error) -> String {
    match error {
        Error::Source(e) => e.to_string(),
        Error::Delivery(e) => e.to_string(),
        Error::Storage(e) => format!("{e:#}"),
        other => other.to_string(),
    }
}
