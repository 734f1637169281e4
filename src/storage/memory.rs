//! In-memory implementation of every store contract
//!
//! Used by tests and dry runs. Feeds keep insertion order so that scheduler
//! ticks are deterministic. Retention sweeps age rows against the injected
//! [`Clock`](crate::clock::Clock).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{
    retention_cutoff, FeedStore, LogStore, SummaryCacheStore, UserNotifySentStore,
    UserNotifySettingsStore, UserStore,
};
use crate::audit::{ActionLog, AppLogEntry};
use crate::clock::{Clock, SharedClock, SystemClock};
use crate::models::{Feed, NotifySentRecord, User, UserNotifySettings};

#[derive(Default)]
struct Tables {
    feeds: Vec<Feed>,
    users: HashMap<String, User>,
    settings: BTreeMap<String, UserNotifySettings>,
    sent: Vec<NotifySentRecord>,
    app_logs: Vec<AppLogEntry>,
    action_logs: Vec<ActionLog>,
    summaries: HashMap<(u64, String), (String, DateTime<Utc>)>,
}

/// Store keeping every table in process memory
pub struct MemoryStore {
    tables: RwLock<Tables>,
    clock: SharedClock,
    unavailable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store whose timestamps come from `clock`
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail (fault injection)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of persisted application logs
    pub fn app_logs(&self) -> Vec<AppLogEntry> {
        self.tables
            .read()
            .map(|t| t.app_logs.clone())
            .unwrap_or_default()
    }

    /// Snapshot of persisted action logs
    pub fn action_logs(&self) -> Vec<ActionLog> {
        self.tables
            .read()
            .map(|t| t.action_logs.clone())
            .unwrap_or_default()
    }

    /// Snapshot of reminder sent-records
    pub fn sent_records(&self) -> Vec<NotifySentRecord> {
        self.tables.read().map(|t| t.sent.clone()).unwrap_or_default()
    }

    /// Insert a sent-record with an explicit timestamp
    pub fn insert_sent_record(&self, record: NotifySentRecord) -> Result<()> {
        let mut tables = self.write()?;
        tables
            .sent
            .retain(|r| !(r.user_id == record.user_id && r.event_id == record.event_id));
        tables.sent.push(record);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.check_available()?;
        self.tables
            .read()
            .map_err(|e| anyhow!("memory store lock poisoned: {e}"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.check_available()?;
        self.tables
            .write()
            .map_err(|e| anyhow!("memory store lock poisoned: {e}"))
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store unavailable"));
        }
        Ok(())
    }

    fn cutoff(&self, older_than_days: u32) -> DateTime<Utc> {
        retention_cutoff(self.clock.now(), older_than_days)
    }
}

#[async_trait]
impl FeedStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Feed>> {
        Ok(self.read()?.feeds.iter().find(|f| f.id() == id).cloned())
    }

    async fn save(&self, feed: &Feed) -> Result<()> {
        let mut tables = self.write()?;
        match tables.feeds.iter_mut().find(|f| f.id() == feed.id()) {
            Some(existing) => *existing = feed.clone(),
            None => tables.feeds.push(feed.clone()),
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut tables = self.write()?;
        let before = tables.feeds.len();
        tables.feeds.retain(|f| f.id() != id);
        Ok(tables.feeds.len() != before)
    }

    async fn list(&self) -> Result<Vec<Feed>> {
        Ok(self.read()?.feeds.clone())
    }

    async fn cleanup_sent_events(&self, older_than_days: u32) -> Result<u64> {
        let cutoff_ms = self.cutoff(older_than_days).timestamp_millis();
        let mut tables = self.write()?;
        let mut removed = 0u64;
        for feed in tables.feeds.iter_mut() {
            let before = feed.state.sent_events.len();
            feed.state
                .sent_events
                .retain(|_, mark| mark.marked_at >= cutoff_ms);
            removed += (before - feed.state.sent_events.len()) as u64;
        }
        Ok(removed)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.read()?.users.get(user_id).cloned())
    }

    async fn save(&self, user: &User) -> Result<()> {
        self.write()?
            .users
            .insert(user.discord_user_id.clone(), user.clone());
        Ok(())
    }
}

#[async_trait]
impl UserNotifySettingsStore for MemoryStore {
    async fn find(&self, user_id: &str) -> Result<Option<UserNotifySettings>> {
        Ok(self.read()?.settings.get(user_id).cloned())
    }

    async fn list_enabled(&self) -> Result<Vec<UserNotifySettings>> {
        Ok(self
            .read()?
            .settings
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn save(&self, settings: &UserNotifySettings) -> Result<()> {
        self.write()?
            .settings
            .insert(settings.discord_user_id.clone(), settings.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<bool> {
        Ok(self.write()?.settings.remove(user_id).is_some())
    }
}

#[async_trait]
impl UserNotifySentStore for MemoryStore {
    async fn mark_sent(&self, user_id: &str, event_id: u64) -> Result<()> {
        self.insert_sent_record(NotifySentRecord {
            user_id: user_id.to_string(),
            event_id,
            notified_at: self.clock.now(),
        })
    }

    async fn get_sent_event_ids(&self, user_id: &str) -> Result<Vec<u64>> {
        Ok(self
            .read()?
            .sent
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.event_id)
            .collect())
    }

    async fn cleanup_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = self.cutoff(days);
        let mut tables = self.write()?;
        let before = tables.sent.len();
        tables.sent.retain(|r| r.notified_at >= cutoff);
        Ok((before - tables.sent.len()) as u64)
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn append_app_log(&self, entry: &AppLogEntry) -> Result<()> {
        self.write()?.app_logs.push(entry.clone());
        Ok(())
    }

    async fn append_action_log(&self, entry: &ActionLog) -> Result<()> {
        self.write()?.action_logs.push(entry.clone());
        Ok(())
    }

    async fn cleanup_app_logs(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = self.cutoff(older_than_days);
        let mut tables = self.write()?;
        let before = tables.app_logs.len();
        tables.app_logs.retain(|l| l.at >= cutoff);
        Ok((before - tables.app_logs.len()) as u64)
    }

    async fn cleanup_action_logs(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = self.cutoff(older_than_days);
        let mut tables = self.write()?;
        let before = tables.action_logs.len();
        tables.action_logs.retain(|l| l.at >= cutoff);
        Ok((before - tables.action_logs.len()) as u64)
    }
}

#[async_trait]
impl SummaryCacheStore for MemoryStore {
    async fn get_summary(&self, event_id: u64, updated_at: &str) -> Result<Option<String>> {
        Ok(self
            .read()?
            .summaries
            .get(&(event_id, updated_at.to_string()))
            .map(|(summary, _)| summary.clone()))
    }

    async fn put_summary(&self, event_id: u64, updated_at: &str, summary: &str) -> Result<()> {
        let now = self.clock.now();
        self.write()?.summaries.insert(
            (event_id, updated_at.to_string()),
            (summary.to_string(), now),
        );
        Ok(())
    }

    async fn cleanup_summary_cache(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = self.cutoff(older_than_days);
        let mut tables = self.write()?;
        let before = tables.summaries.len();
        tables.summaries.retain(|_, (_, created)| *created >= cutoff);
        Ok((before - tables.summaries.len()) as u64)
    }
}
