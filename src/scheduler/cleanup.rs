//! Retention sweeps
//!
//! One slow clock deletes rows older than a per-category number of days:
//!
//! | Category            | Store method                        | Default |
//! |---------------------|-------------------------------------|---------|
//! | application logs    | `LogStore::cleanup_app_logs`        | 7       |
//! | action logs         | `LogStore::cleanup_action_logs`     | 30      |
//! | feed sent events    | `FeedStore::cleanup_sent_events`    | 90      |
//! | summary cache       | `SummaryCacheStore::cleanup_summary_cache` | 30 |
//! | reminder sent-records | `UserNotifySentStore::cleanup_older_than` | 30 |
//!
//! A category without a store counts 0. The first store error aborts the
//! sweep; the next tick starts over.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::trigger::{PeriodicTrigger, TickGuard};
use crate::audit::{ActionLog, ActionType, SharedAuditSink, TracingAuditSink};
use crate::clock::{Clock, SharedClock, SystemClock};
use crate::storage::{FeedStore, LogStore, SummaryCacheStore, UserNotifySentStore};

/// Retention per category, in days, plus the sweep interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub interval_ms: u64,
    pub app_log_days: u32,
    pub action_log_days: u32,
    pub feed_sent_event_days: u32,
    pub summary_cache_days: u32,
    pub notify_sent_days: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_ms: 24 * 60 * 60 * 1000,
            app_log_days: 7,
            action_log_days: 30,
            feed_sent_event_days: 90,
            summary_cache_days: 30,
            notify_sent_days: 30,
        }
    }
}

impl CleanupConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("cleanup interval must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Stores swept by the cleanup; any of them may be absent
#[derive(Clone, Default)]
pub struct CleanupStores {
    pub logs: Option<Arc<dyn LogStore>>,
    pub feeds: Option<Arc<dyn FeedStore>>,
    pub summaries: Option<Arc<dyn SummaryCacheStore>>,
    pub notify_sent: Option<Arc<dyn UserNotifySentStore>>,
}

impl CleanupStores {
    pub fn with_logs(mut self, store: Arc<dyn LogStore>) -> Self {
        self.logs = Some(store);
        self
    }

    pub fn with_feeds(mut self, store: Arc<dyn FeedStore>) -> Self {
        self.feeds = Some(store);
        self
    }

    pub fn with_summaries(mut self, store: Arc<dyn SummaryCacheStore>) -> Self {
        self.summaries = Some(store);
        self
    }

    pub fn with_notify_sent(mut self, store: Arc<dyn UserNotifySentStore>) -> Self {
        self.notify_sent = Some(store);
        self
    }
}

/// Rows deleted per category in one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub app_logs: u64,
    pub action_logs: u64,
    pub feed_sent_events: u64,
    pub summary_cache: u64,
    pub notify_sent: u64,
    pub total_deleted: u64,
}

/// Periodic retention sweeper
pub struct CleanupScheduler {
    config: CleanupConfig,
    stores: CleanupStores,
    audit: SharedAuditSink,
    clock: SharedClock,
    trigger: PeriodicTrigger,
    ticking: AtomicBool,
}

impl CleanupScheduler {
    pub fn new(config: CleanupConfig, stores: CleanupStores) -> Self {
        let trigger = PeriodicTrigger::new("cleanup", config.interval());
        Self {
            config,
            stores,
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
            trigger,
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

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    /// Sweep every present store once
    ///
    /// Stops at the first failing store.
    pub async fn run_cleanup(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let c = &self.config;

        if let Some(logs) = &self.stores.logs {
            report.app_logs = logs
                .cleanup_app_logs(c.app_log_days)
                .await
                .context("app log cleanup failed")?;
            report.action_logs = logs
                .cleanup_action_logs(c.action_log_days)
                .await
                .context("action log cleanup failed")?;
        }
        if let Some(feeds) = &self.stores.feeds {
            report.feed_sent_events = feeds
                .cleanup_sent_events(c.feed_sent_event_days)
                .await
                .context("feed sent-event cleanup failed")?;
        }
        if let Some(summaries) = &self.stores.summaries {
            report.summary_cache = summaries
                .cleanup_summary_cache(c.summary_cache_days)
                .await
                .context("summary cache cleanup failed")?;
        }
        if let Some(sent) = &self.stores.notify_sent {
            report.notify_sent = sent
                .cleanup_older_than(c.notify_sent_days)
                .await
                .context("reminder sent-record cleanup failed")?;
        }

        report.total_deleted = report.app_logs
            + report.action_logs
            + report.feed_sent_events
            + report.summary_cache
            + report.notify_sent;
        Ok(report)
    }

    /// One driven sweep: errors are logged and audited, never propagated
    pub async fn tick(&self) -> Option<CleanupReport> {
        let Some(_guard) = TickGuard::try_acquire(&self.ticking) else {
            tracing::warn!("Cleanup still in progress, skipping");
            return None;
        };

        let started = Instant::now();
        let outcome = self.run_cleanup().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(report) => {
                tracing::info!(
                    app_logs = report.app_logs,
                    action_logs = report.action_logs,
                    feed_sent_events = report.feed_sent_events,
                    summary_cache = report.summary_cache,
                    notify_sent = report.notify_sent,
                    total = report.total_deleted,
                    duration_ms,
                    "Cleanup completed"
                );
                self.audit
                    .record(
                        ActionLog::new(
                            ActionType::Cleanup,
                            format!("Deleted {} rows", report.total_deleted),
                        )
                        .with_duration_ms(duration_ms)
                        .at(self.clock.now()),
                    )
                    .await;
                Some(report)
            }
            Err(e) => {
                tracing::error!(error = format!("{e:#}"), duration_ms, "Cleanup failed");
                self.audit
                    .record(
                        ActionLog::new(ActionType::Cleanup, "Cleanup failed")
                            .with_error(format!("{e:#}"))
                            .with_duration_ms(duration_ms)
                            .at(self.clock.now()),
                    )
                    .await;
                None
            }
        }
    }

    /// Sweep now and then every configured interval
    pub async fn start(self: &Arc<Self>) -> bool {
        let weak: Weak<Self> = Arc::downgrade(self);
        let started = self.trigger.start(move || {
            let weak = weak.clone();
            async move {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.tick().await;
                }
            }
        });

        if started {
            self.audit
                .record(
                    ActionLog::new(ActionType::SchedulerStart, "Cleanup scheduler started")
                        .at(self.clock.now()),
                )
                .await;
        }
        started
    }

    pub async fn stop(&self) -> bool {
        let stopped = self.trigger.stop();
        if stopped {
            self.audit
                .record(
                    ActionLog::new(ActionType::SchedulerStop, "Cleanup scheduler stopped")
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
