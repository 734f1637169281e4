// Core data structures for eventfeed

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Event returned by the upstream search API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub catch: Option<String>,
    pub url: String,
    #[serde(default)]
    pub hash_tag: Option<String>,
    pub started_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub ended_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub limit: Option<u32>, // Capacity; None or 0 means unbounded
    #[serde(default)]
    pub accepted: u32,
    #[serde(default)]
    pub waiting: u32,
    pub updated_at: String, // Kept verbatim, compared as text
    #[serde(default)]
    pub place: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub owner_nickname: Option<String>,
}

impl Event {
    /// Capacity used by the minimum-size filter (absent or zero is unbounded)
    pub fn effective_limit(&self) -> u64 {
        match self.limit {
            None | Some(0) => u64::MAX,
            Some(limit) => u64::from(limit),
        }
    }

    /// Hashtag lower-cased with any leading `#` removed
    pub fn normalized_hash_tag(&self) -> Option<String> {
        self.hash_tag.as_deref().map(normalize_hashtag)
    }
}

/// Normalize a hashtag for comparison: trim, strip leading `#`, lower-case
pub fn normalize_hashtag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_lowercase()
}

/// Result ordering understood by the search API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventOrder {
    Updated = 1,
    #[default]
    StartAsc = 2,
    StartDesc = 3,
}

impl EventOrder {
    /// Numeric code sent to the API
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::StartAsc => "start_asc",
            Self::StartDesc => "start_desc",
        }
    }

    /// Create from string or numeric code
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "1" | "updated" => Some(Self::Updated),
            "2" | "start_asc" | "start" => Some(Self::StartAsc),
            "3" | "start_desc" => Some(Self::StartDesc),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription settings of a feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub id: String,
    pub channel_id: String,
    /// 5-field cron expression evaluated in the configured timezone
    pub schedule: String,
    pub range_days: u32,
    #[serde(default)]
    pub keywords_and: Vec<String>,
    #[serde(default)]
    pub keywords_or: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub hashtag: Option<String>,
    #[serde(default)]
    pub owner_nickname: Option<String>,
    #[serde(default)]
    pub min_participant_count: Option<u32>,
    #[serde(default)]
    pub min_limit: Option<u32>,
    #[serde(default)]
    pub order: EventOrder,
}

impl FeedConfig {
    /// Create a config with no optional filters
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        schedule: impl Into<String>,
        range_days: u32,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            schedule: schedule.into(),
            range_days,
            keywords_and: Vec::new(),
            keywords_or: Vec::new(),
            locations: Vec::new(),
            hashtag: None,
            owner_nickname: None,
            min_participant_count: None,
            min_limit: None,
            order: EventOrder::default(),
        }
    }

    /// Whether either minimum-size threshold is configured
    pub fn has_size_filter(&self) -> bool {
        self.min_participant_count.is_some() || self.min_limit.is_some()
    }

    /// Validate user-supplied settings
    ///
    /// A hashtag that normalizes to nothing (blank or a lone `#`) would
    /// silently disable the hashtag filter, so it is rejected.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("feed id cannot be empty".to_string());
        }
        if let Some(tag) = &self.hashtag {
            if normalize_hashtag(tag).is_empty() {
                return Err(format!("hashtag '{tag}' is empty after normalization"));
            }
        }
        Ok(())
    }
}

/// Last delivered version of an event within a feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMark {
    pub updated_at: String,
    /// Epoch ms at which the executor last wrote this entry
    pub marked_at: i64,
}

/// Mutable per-feed scheduling and dedup state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeedState {
    pub last_run_at: Option<i64>,
    /// `None` means the feed is not scheduled
    pub next_run_at: Option<i64>,
    #[serde(default)]
    pub sent_events: HashMap<u64, SentMark>,
}

impl FeedState {
    /// `updated_at` recorded for an event, if it was ever delivered or re-scanned
    pub fn sent_updated_at(&self, event_id: u64) -> Option<&str> {
        self.sent_events
            .get(&event_id)
            .map(|mark| mark.updated_at.as_str())
    }

    /// An event is new if never seen or if its `updated_at` changed
    pub fn is_new(&self, event: &Event) -> bool {
        self.sent_updated_at(event.id) != Some(event.updated_at.as_str())
    }

    /// Whether the feed is due at `now_ms`
    pub fn is_due(&self, now_ms: i64) -> bool {
        matches!(self.next_run_at, Some(next) if next <= now_ms)
    }
}

/// A subscription: configuration plus state, keyed by `config.id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub config: FeedConfig,
    pub state: FeedState,
}

impl Feed {
    /// Create a feed with empty state (not yet scheduled)
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            state: FeedState::default(),
        }
    }

    /// Feed identifier
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Copy of this feed with a replaced state
    pub fn with_state(&self, state: FeedState) -> Self {
        Self {
            config: self.config.clone(),
            state,
        }
    }
}

/// Link between a chat user and their event-site profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub discord_user_id: String,
    pub nickname: String,
}

/// Per-user "starting soon" reminder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNotifySettings {
    pub discord_user_id: String,
    pub enabled: bool,
    pub minutes_before: u32,
    pub updated_at: DateTime<Utc>,
}

impl UserNotifySettings {
    /// Create enabled settings with the given lead time
    pub fn enabled(discord_user_id: impl Into<String>, minutes_before: u32) -> Self {
        Self {
            discord_user_id: discord_user_id.into(),
            enabled: true,
            minutes_before,
            updated_at: Utc::now(),
        }
    }
}

/// Record that a reminder for `(user_id, event_id)` was delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifySentRecord {
    pub user_id: String,
    pub event_id: u64,
    pub notified_at: DateTime<Utc>,
}

/// Outcome of one feed execution (never persisted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub feed_id: String,
    pub total: usize,
    pub new_count: usize,
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Successful execution
    pub fn success(feed_id: impl Into<String>, total: usize, new_count: usize) -> Self {
        Self {
            feed_id: feed_id.into(),
            total,
            new_count,
            error: None,
        }
    }

    /// Failed execution with no events counted
    pub fn failure(feed_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            feed_id: feed_id.into(),
            total: 0,
            new_count: 0,
            error: Some(error.into()),
        }
    }

    /// Check if the execution failed
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
