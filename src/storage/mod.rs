//! Store contracts consumed by the schedulers
//!
//! Business logic only sees these traits; two implementations are provided:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │        FeedScheduler / FeedExecutor / NotifyScheduler        │
//! │                     CleanupScheduler                         │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  FeedStore, UserStore, UserNotifySettingsStore,              │
//! │  UserNotifySentStore, LogStore, SummaryCacheStore            │
//! └──────────────────────────────────────────────────────────────┘
//!                  │                          │
//!                  ▼                          ▼
//!        ┌──────────────────┐       ┌──────────────────┐
//!        │   SqliteStore    │       │   MemoryStore    │
//!        └──────────────────┘       └──────────────────┘
//! ```
//!
//! Every `cleanup*` method deletes rows older than the given number of days and
//! returns how many were removed.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::audit::{ActionLog, AppLogEntry};
use crate::models::{Feed, User, UserNotifySettings};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Persistence for feed configuration and state
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Load a feed by id
    async fn get(&self, id: &str) -> Result<Option<Feed>>;

    /// Insert or replace a feed
    async fn save(&self, feed: &Feed) -> Result<()>;

    /// Remove a feed; returns whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// All feeds in store order
    async fn list(&self) -> Result<Vec<Feed>>;

    /// Drop sent-event entries last written more than `older_than_days` ago
    async fn cleanup_sent_events(&self, older_than_days: u32) -> Result<u64>;
}

/// Lookup of linked user profiles
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find(&self, user_id: &str) -> Result<Option<User>>;

    async fn save(&self, user: &User) -> Result<()>;
}

/// Per-user reminder settings
#[async_trait]
pub trait UserNotifySettingsStore: Send + Sync {
    async fn find(&self, user_id: &str) -> Result<Option<UserNotifySettings>>;

    /// Settings with `enabled = true`
    async fn list_enabled(&self) -> Result<Vec<UserNotifySettings>>;

    async fn save(&self, settings: &UserNotifySettings) -> Result<()>;

    async fn delete(&self, user_id: &str) -> Result<bool>;
}

/// Idempotence records for delivered reminders
#[async_trait]
pub trait UserNotifySentStore: Send + Sync {
    /// Record that `event_id` was notified to `user_id`
    async fn mark_sent(&self, user_id: &str, event_id: u64) -> Result<()>;

    /// Event ids already notified to `user_id`
    async fn get_sent_event_ids(&self, user_id: &str) -> Result<Vec<u64>>;

    async fn cleanup_older_than(&self, days: u32) -> Result<u64>;
}

/// Application and action (audit) logs
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append_app_log(&self, entry: &AppLogEntry) -> Result<()>;

    async fn append_action_log(&self, entry: &ActionLog) -> Result<()>;

    async fn cleanup_app_logs(&self, older_than_days: u32) -> Result<u64>;

    async fn cleanup_action_logs(&self, older_than_days: u32) -> Result<u64>;
}

/// Cache of generated event summaries keyed by event version
#[async_trait]
pub trait SummaryCacheStore: Send + Sync {
    async fn get_summary(&self, event_id: u64, updated_at: &str) -> Result<Option<String>>;

    async fn put_summary(&self, event_id: u64, updated_at: &str, summary: &str) -> Result<()>;

    async fn cleanup_summary_cache(&self, older_than_days: u32) -> Result<u64>;
}

/// Instant before which rows are considered expired
pub fn retention_cutoff(now: DateTime<Utc>, older_than_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(older_than_days))
}
