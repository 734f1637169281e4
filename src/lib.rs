//! eventfeed - cron-driven event feed poller
//!
//! Polls an event search API on per-feed cron schedules, delivers only new or
//! updated events, reminds users before their registered events start and
//! sweeps old bookkeeping rows.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`scheduler`] - Feed, reminder and cleanup schedulers plus the feed executor
//! - [`source`] - Event search API client
//! - [`notifications`] - Delivery channels (webhook, log)
//! - [`storage`] - Store contracts with SQLite and in-memory backends
//! - [`audit`] - Action log and application log capture
//! - [`models`] - Core data structures and types
//! - [`clock`] - Injectable time source
//! - [`utils`] - Retry and formatting helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use eventfeed::config::Config;
//! use eventfeed::notifications::LogChannel;
//! use eventfeed::scheduler::{FeedExecutor, FeedScheduler};
//! use eventfeed::source::ConnpassClient;
//! use eventfeed::storage::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(SqliteStore::new(&config.database.sqlite_path)?);
//!     let source = Arc::new(ConnpassClient::new(config.api.clone())?);
//!     let executor = Arc::new(FeedExecutor::new(store.clone(), source, Arc::new(LogChannel::new())));
//!     let scheduler = Arc::new(FeedScheduler::new(store, executor));
//!     scheduler.start().await;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod notifications;
pub mod scheduler;
pub mod source;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, EventFeedErrorTrait, Result};
    pub use crate::models::{Event, ExecutionResult, Feed, FeedConfig, FeedState};
    pub use crate::scheduler::{CleanupScheduler, FeedExecutor, FeedScheduler, NotifyScheduler};
    pub use crate::storage::{MemoryStore, SqliteStore};
}

// Direct re-exports for convenience
pub use models::{Event, ExecutionResult, Feed, FeedConfig, FeedState};
