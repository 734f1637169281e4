//! "Starting soon" reminders
//!
//! For every user with reminders enabled, each cycle:
//!
//! ```text
//! resolve nickname ──► fetch registered events (today, + tomorrow if the
//!   window crosses midnight; cached per nickname/day) ──► keep
//!   now < start <= now + minutes_before ──► drop already sent ──► deliver
//!   ──► mark sent
//! ```
//!
//! Users are processed sequentially with a fixed delay between them. A
//! failure for one user is logged and audited, and the cycle moves on.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use super::trigger::{PeriodicTrigger, TickGuard};
use crate::audit::{ActionLog, ActionType, SharedAuditSink, TracingAuditSink};
use crate::clock::{Clock, SharedClock, SystemClock};
use crate::error::{Error, EventFeedErrorTrait};
use crate::models::{Event, UserNotifySettings};
use crate::notifications::UserDeliveryChannel;
use crate::source::{EventSource, SearchParams};
use crate::storage::{UserNotifySentStore, UserNotifySettingsStore, UserStore};

/// Default tick interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(60_000);

/// Default pause between two users in one cycle
pub const DEFAULT_USER_DELAY: Duration = Duration::from_millis(1_100);

/// Default lifetime of a cached day of events
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(30 * 60 * 1000);

/// Default retention of reminder sent-records
pub const DEFAULT_SENT_RETENTION_DAYS: u32 = 30;

/// Events whose start lies in `(now, target]`
pub fn events_in_window(events: &[Event], now: DateTime<Utc>, target: DateTime<Utc>) -> Vec<Event> {
    events
        .iter()
        .filter(|e| {
            let start = e.started_at.with_timezone(&Utc);
            now < start && start <= target
        })
        .cloned()
        .collect()
}

/// Outcome of one notify cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyCycleReport {
    /// Enabled users considered
    pub users: usize,
    /// Users that received at least one reminder
    pub notified_users: usize,
    /// Reminders delivered (events)
    pub events_sent: usize,
    /// Users without a linked profile
    pub skipped_users: usize,
    /// Users whose processing failed
    pub failed_users: usize,
    /// Sent-records removed by the retention sweep
    pub cleaned_records: u64,
    /// The cycle did not run because another one was in progress
    pub overlapped: bool,
}

enum UserOutcome {
    NoProfile,
    Nothing,
    Sent(usize),
}

#[derive(Clone)]
struct CachedDay {
    events: Vec<Event>,
    fetched_at: DateTime<Utc>,
}

/// Store and sink handles used by [`NotifyScheduler`]
#[derive(Clone)]
pub struct NotifyStores {
    pub settings: Arc<dyn UserNotifySettingsStore>,
    pub users: Arc<dyn UserStore>,
    pub sent: Arc<dyn UserNotifySentStore>,
}

/// Per-user reminder scheduler
pub struct NotifyScheduler {
    stores: NotifyStores,
    source: Arc<dyn EventSource>,
    delivery: Arc<dyn UserDeliveryChannel>,
    audit: SharedAuditSink,
    clock: SharedClock,
    timezone: Tz,
    user_delay: Duration,
    cache_ttl: chrono::Duration,
    sent_retention_days: u32,
    page_size: u32,
    cache: Mutex<HashMap<(String, NaiveDate), CachedDay>>,
    trigger: PeriodicTrigger,
    ticking: AtomicBool,
}

impl NotifyScheduler {
    pub fn new(
        stores: NotifyStores,
        source: Arc<dyn EventSource>,
        delivery: Arc<dyn UserDeliveryChannel>,
    ) -> Self {
        Self {
            stores,
            source,
            delivery,
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
            timezone: chrono_tz::Asia::Tokyo,
            user_delay: DEFAULT_USER_DELAY,
            cache_ttl: to_chrono(DEFAULT_CACHE_TTL),
            sent_retention_days: DEFAULT_SENT_RETENTION_DAYS,
            page_size: super::executor::DEFAULT_PAGE_SIZE,
            cache: Mutex::new(HashMap::new()),
            trigger: PeriodicTrigger::new("notify", DEFAULT_CHECK_INTERVAL),
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

    /// Timezone that defines calendar days
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.trigger = PeriodicTrigger::new("notify", interval);
        self
    }

    pub fn with_user_delay(mut self, delay: Duration) -> Self {
        self.user_delay = delay;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = to_chrono(ttl);
        self
    }

    pub fn with_sent_retention_days(mut self, days: u32) -> Self {
        self.sent_retention_days = days;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Number of cached (nickname, day) entries
    pub fn cached_days(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// One notify cycle
    ///
    /// Only a failure to list enabled users aborts the cycle.
    pub async fn run_cycle(&self) -> Result<NotifyCycleReport> {
        let Some(_guard) = TickGuard::try_acquire(&self.ticking) else {
            tracing::warn!("Notify cycle still in progress, skipping");
            return Ok(NotifyCycleReport {
                overlapped: true,
                ..Default::default()
            });
        };

        let started = Instant::now();
        let enabled = self.stores.settings.list_enabled().await?;
        let mut report = NotifyCycleReport {
            users: enabled.len(),
            ..Default::default()
        };
        if enabled.is_empty() {
            return Ok(report);
        }

        for (i, settings) in enabled.iter().enumerate() {
            if i > 0 && !self.user_delay.is_zero() {
                tokio::time::sleep(self.user_delay).await;
            }

            let user_started = Instant::now();
            match self.process_user(settings).await {
                Ok(UserOutcome::NoProfile) => {
                    tracing::info!(user_id = %settings.discord_user_id, "No linked profile, skipping");
                    report.skipped_users += 1;
                }
                Ok(UserOutcome::Nothing) => {}
                Ok(UserOutcome::Sent(count)) => {
                    report.notified_users += 1;
                    report.events_sent += count;
                    self.audit
                        .record(
                            ActionLog::new(ActionType::NotifySend, format!("Sent {count} reminders"))
                                .with_user(&settings.discord_user_id)
                                .with_duration_ms(user_started.elapsed().as_millis() as u64)
                                .at(self.clock.now()),
                        )
                        .await;
                }
                Err(e) => {
                    report.failed_users += 1;
                    tracing::warn!(
                        user_id = %settings.discord_user_id,
                        category = e.category().as_str(),
                        recoverable = e.is_recoverable(),
                        error = %e,
                        "Reminder processing failed"
                    );
                    self.audit
                        .record(
                            ActionLog::new(ActionType::NotifySend, "Reminder processing failed")
                                .with_user(&settings.discord_user_id)
                                .with_error(e.to_string())
                                .with_duration_ms(user_started.elapsed().as_millis() as u64)
                                .at(self.clock.now()),
                        )
                        .await;
                }
            }
        }

        match self
            .stores
            .sent
            .cleanup_older_than(self.sent_retention_days)
            .await
        {
            Ok(removed) => report.cleaned_records = removed,
            Err(e) => tracing::warn!(error = %e, "Failed to clean reminder sent-records"),
        }

        self.audit
            .record(
                ActionLog::new(
                    ActionType::NotifyCheck,
                    format!(
                        "Notify cycle: {} users, {} reminders, {} failed",
                        report.users, report.events_sent, report.failed_users
                    ),
                )
                .with_duration_ms(started.elapsed().as_millis() as u64)
                .at(self.clock.now()),
            )
            .await;

        Ok(report)
    }

    async fn process_user(&self, settings: &UserNotifySettings) -> Result<UserOutcome, Error> {
        let user_id = settings.discord_user_id.as_str();
        let Some(user) = self.stores.users.find(user_id).await? else {
            return Ok(UserOutcome::NoProfile);
        };

        let now = self.clock.now();
        let target = now + chrono::Duration::minutes(i64::from(settings.minutes_before));
        let today = now.with_timezone(&self.timezone).date_naive();
        let target_day = target.with_timezone(&self.timezone).date_naive();

        let mut events = self.fetch_day(&user.nickname, today, now).await?;
        if target_day != today {
            if let Some(tomorrow) = today.succ_opt() {
                let more = self.fetch_day(&user.nickname, tomorrow, now).await?;
                let seen: HashSet<u64> = events.iter().map(|e| e.id).collect();
                events.extend(more.into_iter().filter(|e| !seen.contains(&e.id)));
            }
        }

        let in_window = events_in_window(&events, now, target);
        if in_window.is_empty() {
            return Ok(UserOutcome::Nothing);
        }

        let sent: HashSet<u64> = self
            .stores
            .sent
            .get_sent_event_ids(user_id)
            .await?
            .into_iter()
            .collect();
        let pending: Vec<Event> = in_window
            .into_iter()
            .filter(|e| !sent.contains(&e.id))
            .collect();
        if pending.is_empty() {
            return Ok(UserOutcome::Nothing);
        }

        self.delivery
            .send_event_notification(user_id, &pending)
            .await?;

        // Record every delivered event even if one write fails, so only the
        // failed ones are sent again next cycle.
        let mut unrecorded = Vec::new();
        for event in &pending {
            if let Err(e) = self.stores.sent.mark_sent(user_id, event.id).await {
                tracing::warn!(user_id = %user_id, event_id = event.id, error = %e, "Failed to record reminder");
                unrecorded.push(event.id);
            }
        }
        if !unrecorded.is_empty() {
            return Err(Error::Storage(anyhow::anyhow!(
                "{} of {} reminders delivered but not recorded: {:?}",
                unrecorded.len(),
                pending.len(),
                unrecorded
            )));
        }

        tracing::info!(user_id = %user_id, count = pending.len(), "Reminders sent");
        Ok(UserOutcome::Sent(pending.len()))
    }

    /// Events of `nickname` on `date`, served from cache while fresh
    async fn fetch_day(
        &self,
        nickname: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, Error> {
        let key = (nickname.to_string(), date);
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(&key) {
                if now - hit.fetched_at < self.cache_ttl {
                    tracing::debug!(nickname, %date, "Event cache hit");
                    return Ok(hit.events.clone());
                }
            }
        }

        let params = SearchParams::for_user_day(nickname, date, self.page_size);
        let response = self.source.search(&params).await?;

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            key,
            CachedDay {
                events: response.events.clone(),
                fetched_at: now,
            },
        );
        let max_age = self
            .cache_ttl
            .checked_mul(2)
            .unwrap_or(chrono::Duration::MAX);
        cache.retain(|_, day| now - day.fetched_at < max_age);

        Ok(response.events)
    }

    /// Run one cycle now and then every check interval
    pub async fn start(self: &Arc<Self>) -> bool {
        let weak: Weak<Self> = Arc::downgrade(self);
        let started = self.trigger.start(move || {
            let weak = weak.clone();
            async move {
                if let Some(scheduler) = weak.upgrade() {
                    if let Err(e) = scheduler.run_cycle().await {
                        tracing::error!(error = %e, "Notify cycle failed");
                    }
                }
            }
        });

        if started {
            self.audit
                .record(
                    ActionLog::new(ActionType::SchedulerStart, "Notify scheduler started")
                        .at(self.clock.now()),
                )
                .await;
        }
        started
    }

    /// Stop arming future cycles
    pub async fn stop(&self) -> bool {
        let stopped = self.trigger.stop();
        if stopped {
            self.audit
                .record(
                    ActionLog::new(ActionType::SchedulerStop, "Notify scheduler stopped")
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

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
