//! Polling, reminder and retention scheduling
//!
//! Three independent clocks share one [`trigger::PeriodicTrigger`] driver:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         eventfeed run                            │
//! │                                                                  │
//! │  ┌───────────────┐   ┌────────────────┐   ┌──────────────────┐   │
//! │  │ FeedScheduler │   │ NotifyScheduler│   │ CleanupScheduler │   │
//! │  │  every 60s    │   │   every 60s    │   │   every 24h      │   │
//! │  └───────┬───────┘   └───────┬────────┘   └────────┬─────────┘   │
//! │          │ due feeds         │ enabled users       │ retention   │
//! │          ▼                   ▼                     ▼             │
//! │  ┌───────────────┐   ┌────────────────┐   ┌──────────────────┐   │
//! │  │ FeedExecutor  │   │  EventSource   │   │      stores      │   │
//! │  │ search/filter │   │ + day cache    │   │  (logs, sent,    │   │
//! │  │ dedup/deliver │   │ + sent-records │   │   summaries)     │   │
//! │  └───────────────┘   └────────────────┘   └──────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cron`] - 5-field crontab evaluation in a fixed timezone
//! - [`trigger`] - Fixed-interval tick driver and tick-in-progress guard
//! - [`executor`] - One fetch/filter/dedup/deliver/persist cycle of a feed
//! - [`feed`] - Runs due feeds and reschedules them
//! - [`notify`] - Per-user event start reminders
//! - [`cleanup`] - Retention sweeps
//! - [`error`] - Scheduler error types
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use eventfeed::scheduler::{FeedExecutor, FeedScheduler};
//!
//! let executor = Arc::new(FeedExecutor::new(store.clone(), source, delivery));
//! let scheduler = Arc::new(FeedScheduler::new(store, executor));
//!
//! scheduler.schedule_feed("rust-tokyo").await?;
//! scheduler.start().await;
//! // ...
//! scheduler.stop().await;
//! ```

pub mod cleanup;
pub mod cron;
pub mod error;
pub mod executor;
pub mod feed;
pub mod notify;
pub mod trigger;

pub use cleanup::{CleanupConfig, CleanupReport, CleanupScheduler, CleanupStores};
pub use error::{SchedulerError, SchedulerResult};
pub use executor::{FeedExecutor, FEED_NOT_FOUND};
pub use feed::FeedScheduler;
pub use notify::{NotifyCycleReport, NotifyScheduler, NotifyStores};
pub use trigger::{PeriodicTrigger, TickGuard};
