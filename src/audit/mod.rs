//! Action (audit) logging and persisted application logs
//!
//! Schedulers report what they did through an [`AuditSink`]. Two sinks exist:
//! [`TracingAuditSink`] only writes to the tracing output, [`StoreAuditSink`]
//! additionally appends to the `action_logs` table of a [`LogStore`].
//!
//! Warnings and errors emitted anywhere through `tracing` can be mirrored into
//! the `app_logs` table with [`AppLogLayer`].

pub mod layer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::storage::LogStore;

pub use layer::{spawn_app_log_writer, AppLogLayer};

/// Kind of operation recorded in the action log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    FeedExecute,
    FeedSchedule,
    FeedUnschedule,
    NotifyCheck,
    NotifySend,
    Cleanup,
    SchedulerStart,
    SchedulerStop,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FeedExecute => "feed_execute",
            Self::FeedSchedule => "feed_schedule",
            Self::FeedUnschedule => "feed_unschedule",
            Self::NotifyCheck => "notify_check",
            Self::NotifySend => "notify_send",
            Self::Cleanup => "cleanup",
            Self::SchedulerStart => "scheduler_start",
            Self::SchedulerStop => "scheduler_stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "feed_execute" => Some(Self::FeedExecute),
            "feed_schedule" => Some(Self::FeedSchedule),
            "feed_unschedule" => Some(Self::FeedUnschedule),
            "notify_check" => Some(Self::NotifyCheck),
            "notify_send" => Some(Self::NotifySend),
            "cleanup" => Some(Self::Cleanup),
            "scheduler_start" => Some(Self::SchedulerStart),
            "scheduler_stop" => Some(Self::SchedulerStop),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity stored with persisted log rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" | "trace" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Map a tracing level onto the stored levels (trace folds into debug)
    pub fn from_tracing(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Self::Error,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::INFO => Self::Info,
            tracing::Level::DEBUG | tracing::Level::TRACE => Self::Debug,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `app_logs` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppLogEntry {
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    /// Remaining structured fields, JSON encoded
    pub context: Option<String>,
    pub at: DateTime<Utc>,
}

/// One row of the `action_logs` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    pub id: String,
    pub action: ActionType,
    pub level: LogLevel,
    pub feed_id: Option<String>,
    pub user_id: Option<String>,
    pub message: String,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
    pub at: DateTime<Utc>,
}

impl ActionLog {
    pub fn new(action: ActionType, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            level: LogLevel::Info,
            feed_id: None,
            user_id: None,
            message: message.into(),
            error: None,
            duration_ms: None,
            at: Utc::now(),
        }
    }

    pub fn with_feed(mut self, feed_id: impl Into<String>) -> Self {
        self.feed_id = Some(feed_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach an error; raises the level to `Error`
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.level = LogLevel::Error;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// Destination for action records
///
/// Recording never fails from the caller's point of view; sinks log their own
/// write errors.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: ActionLog);
}

/// Shared audit sink handle
pub type SharedAuditSink = Arc<dyn AuditSink>;

fn trace_action(entry: &ActionLog) {
    let feed_id = entry.feed_id.as_deref().unwrap_or("-");
    let user_id = entry.user_id.as_deref().unwrap_or("-");
    match entry.level {
        LogLevel::Error => tracing::error!(
            action = %entry.action,
            feed_id,
            user_id,
            error = entry.error.as_deref().unwrap_or(""),
            "{}",
            entry.message
        ),
        LogLevel::Warn => tracing::warn!(action = %entry.action, feed_id, user_id, "{}", entry.message),
        LogLevel::Info => tracing::info!(action = %entry.action, feed_id, user_id, "{}", entry.message),
        LogLevel::Debug => tracing::debug!(action = %entry.action, feed_id, user_id, "{}", entry.message),
    }
}

/// Audit sink writing to tracing only
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: ActionLog) {
        trace_action(&entry);
    }
}

/// Audit sink persisting into a [`LogStore`]
pub struct StoreAuditSink {
    store: Arc<dyn LogStore>,
}

impl StoreAuditSink {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditSink for StoreAuditSink {
    async fn record(&self, entry: ActionLog) {
        trace_action(&entry);
        if let Err(e) = self.store.append_action_log(&entry).await {
            tracing::warn!(action = %entry.action, error = %e, "Failed to persist action log");
        }
    }
}
