//! Upstream event search
//!
//! The [`EventSource`] trait is the only way the schedulers reach the event
//! search API. Failures are reported as [`SourceError`], whose message text is
//! what the retry layer classifies.

pub mod connpass;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Event, EventOrder, FeedConfig};
use crate::utils::retry::is_transient_message;

pub use connpass::{ConnpassClient, ConnpassConfig};

/// Errors returned by an event source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Upstream answered with a non-success status
    #[error("HTTP {status} {reason}")]
    Status { status: u16, reason: String },

    /// Transport failure (connect, DNS, timeout)
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),

    /// Any other failure, carried as plain text
    #[error("{0}")]
    Other(String),
}

impl SourceError {
    /// Create an error from free-form text
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Transient errors are worth retrying; classification is message based
    pub fn is_recoverable(&self) -> bool {
        is_transient_message(&self.to_string())
    }
}

/// Search parameters understood by an [`EventSource`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchParams {
    /// First day of the window (inclusive)
    pub from: Option<NaiveDate>,
    /// Last day of the window (inclusive)
    pub to: Option<NaiveDate>,
    /// All of these keywords must match
    pub keywords_and: Vec<String>,
    /// Any of these keywords may match
    pub keywords_or: Vec<String>,
    /// Prefecture / location names
    pub locations: Vec<String>,
    /// Events organised by this user
    pub owner_nickname: Option<String>,
    /// Events this user registered for
    pub nickname: Option<String>,
    pub order: Option<EventOrder>,
    /// Page size
    pub count: Option<u32>,
}

impl SearchParams {
    /// Parameters for one feed polling cycle: `today ..= today + range_days`
    pub fn for_feed(config: &FeedConfig, today: NaiveDate, page_size: u32) -> Self {
        Self {
            from: Some(today),
            to: Some(today + Duration::days(i64::from(config.range_days))),
            keywords_and: config.keywords_and.clone(),
            keywords_or: config.keywords_or.clone(),
            locations: config.locations.clone(),
            owner_nickname: config.owner_nickname.clone(),
            nickname: None,
            order: Some(config.order),
            count: Some(page_size),
        }
    }

    /// Parameters for one user's registered events on a single day
    pub fn for_user_day(nickname: &str, date: NaiveDate, page_size: u32) -> Self {
        Self {
            from: Some(date),
            to: Some(date),
            nickname: Some(nickname.to_string()),
            order: Some(EventOrder::StartAsc),
            count: Some(page_size),
            ..Default::default()
        }
    }

    /// Every day of the window, in order
    pub fn dates(&self) -> Vec<NaiveDate> {
        match (self.from, self.to) {
            (Some(from), Some(to)) if from <= to => from.iter_days().take_while(|d| *d <= to).collect(),
            (Some(from), None) => vec![from],
            (None, Some(to)) => vec![to],
            _ => Vec::new(),
        }
    }
}

/// Search result page
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results_returned: u32,
    #[serde(default)]
    pub results_available: u32,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl SearchResponse {
    /// Response containing exactly these events
    pub fn from_events(events: Vec<Event>) -> Self {
        let n = events.len() as u32;
        Self {
            results_returned: n,
            results_available: n,
            events,
        }
    }
}

/// Client for the upstream event search API
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Search events matching `params`
    async fn search(&self, params: &SearchParams) -> Result<SearchResponse, SourceError>;
}
