//! Cron-driven feed scheduler
//!
//! Owns the "what is due" clock for every feed. Each tick lists the feeds,
//! runs the due ones one after another with a fixed delay between them, and
//! always reschedules a feed after its run, whatever the outcome (error
//! result or panic).

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono_tz::Tz;
use futures::FutureExt;

use super::cron;
use super::executor::FeedExecutor;
use super::trigger::{PeriodicTrigger, TickGuard};
use crate::audit::{ActionLog, ActionType, LogLevel, SharedAuditSink, TracingAuditSink};
use crate::clock::{Clock, SharedClock, SystemClock};
use crate::models::{ExecutionResult, FeedState};
use crate::storage::FeedStore;

/// Default tick interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(60_000);

/// Default pause between two feed executions in one tick
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_millis(1_100);

/// Scheduler running due feeds through a [`FeedExecutor`]
pub struct FeedScheduler {
    store: Arc<dyn FeedStore>,
    executor: Arc<FeedExecutor>,
    audit: SharedAuditSink,
    clock: SharedClock,
    timezone: Tz,
    rate_limit_delay: Duration,
    trigger: PeriodicTrigger,
    ticking: AtomicBool,
}

impl FeedScheduler {
    pub fn new(store: Arc<dyn FeedStore>, executor: Arc<FeedExecutor>) -> Self {
        Self {
            store,
            executor,
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
            timezone: chrono_tz::Asia::Tokyo,
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY,
            trigger: PeriodicTrigger::new("feed", DEFAULT_CHECK_INTERVAL),
            ticking: AtomicBool::new(false),
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

    /// Timezone cron expressions are evaluated in
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.trigger = PeriodicTrigger::new("feed", interval);
        self
    }

    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    /// Compute and persist the feed's next run
    ///
    /// Returns the new `next_run_at`; `None` when the feed is absent or its
    /// cron expression cannot be evaluated (the feed is then unscheduled).
    pub async fn schedule_feed(&self, feed_id: &str) -> Result<Option<i64>> {
        let Some(feed) = self.store.get(feed_id).await? else {
            tracing::debug!(feed_id = %feed_id, "Feed not found, nothing to schedule");
            return Ok(None);
        };

        let next_run_at = cron::next_run_at(&feed.config.schedule, self.clock.now(), self.timezone);
        let state = FeedState {
            next_run_at,
            ..feed.state.clone()
        };
        self.store.save(&feed.with_state(state)).await?;

        let entry = match next_run_at {
            Some(next) => ActionLog::new(ActionType::FeedSchedule, format!("Next run at {next}"))
                .with_level(LogLevel::Debug),
            None => ActionLog::new(ActionType::FeedSchedule, "Feed left unscheduled")
                .with_error(format!("unusable schedule '{}'", feed.config.schedule))
                .with_level(LogLevel::Warn),
        };
        self.audit
            .record(entry.with_feed(feed_id).at(self.clock.now()))
            .await;

        Ok(next_run_at)
    }

    /// Clear the feed's next run; returns `false` when the feed is absent
    pub async fn unschedule_feed(&self, feed_id: &str) -> Result<bool> {
        let Some(feed) = self.store.get(feed_id).await? else {
            return Ok(false);
        };

        let state = FeedState {
            next_run_at: None,
            ..feed.state.clone()
        };
        self.store.save(&feed.with_state(state)).await?;

        self.audit
            .record(
                ActionLog::new(ActionType::FeedUnschedule, "Feed unscheduled")
                    .with_feed(feed_id)
                    .at(self.clock.now()),
            )
            .await;
        Ok(true)
    }

    /// One tick: run every due feed sequentially and reschedule it
    ///
    /// A tick that starts while another is still running is skipped.
    pub async fn run_due_feeds(&self) -> Vec<ExecutionResult> {
        let Some(_guard) = TickGuard::try_acquire(&self.ticking) else {
            tracing::warn!("Feed tick still in progress, skipping");
            return Vec::new();
        };

        let now_ms = self.clock.now_ms();
        let feeds = match self.store.list().await {
            Ok(feeds) => feeds,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list feeds");
                return Vec::new();
            }
        };

        let due: Vec<String> = feeds
            .iter()
            .filter(|f| f.state.is_due(now_ms))
            .map(|f| f.config.id.clone())
            .collect();
        if due.is_empty() {
            return Vec::new();
        }

        tracing::info!(due = due.len(), total = feeds.len(), "Running due feeds");
        let started = Instant::now();
        let mut results = Vec::with_capacity(due.len());

        for (i, feed_id) in due.iter().enumerate() {
            if i > 0 && !self.rate_limit_delay.is_zero() {
                tokio::time::sleep(self.rate_limit_delay).await;
            }
            results.push(self.run_and_reschedule(feed_id).await);
        }

        let failed = results.iter().filter(|r| r.is_error()).count();
        tracing::info!(
            executed = results.len(),
            failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Feed tick completed"
        );
        results
    }

    async fn run_and_reschedule(&self, feed_id: &str) -> ExecutionResult {
        let outcome = AssertUnwindSafe(self.executor.execute(feed_id))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(feed_id = %feed_id, panic = %message, "Feed execution panicked");
                self.audit
                    .record(
                        ActionLog::new(ActionType::FeedExecute, "Feed execution panicked")
                            .with_feed(feed_id)
                            .with_error(message.clone())
                            .at(self.clock.now()),
                    )
                    .await;
                ExecutionResult::failure(feed_id, format!("panic: {message}"))
            }
        };

        if let Err(e) = self.schedule_feed(feed_id).await {
            tracing::error!(feed_id = %feed_id, error = %e, "Failed to reschedule feed");
        }
        result
    }

    /// Run one tick now and then every check interval
    ///
    /// Returns `false` if already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let weak: Weak<Self> = Arc::downgrade(self);
        let started = self.trigger.start(move || {
            let weak = weak.clone();
            async move {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.run_due_feeds().await;
                }
            }
        });

        if started {
            self.audit
                .record(
                    ActionLog::new(ActionType::SchedulerStart, "Feed scheduler started")
                        .at(self.clock.now()),
                )
                .await;
        }
        started
    }

    /// Stop arming future ticks; an in-flight tick completes
    pub async fn stop(&self) -> bool {
        let stopped = self.trigger.stop();
        if stopped {
            self.audit
                .record(
                    ActionLog::new(ActionType::SchedulerStop, "Feed scheduler stopped")
                        .at(self.clock.now()),
                )
                .await;
        }
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.trigger.is_running()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
