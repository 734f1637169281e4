//! Unified error handling for the eventfeed crate
//!
//! Domain errors stay close to where they are raised ([`SourceError`],
//! [`ChannelError`]); this module folds them and store failures into a single
//! [`Error`] for the schedulers that swallow per-item failures. Cron and
//! timezone problems stay [`SchedulerError`](crate::scheduler::SchedulerError).
//!
//! # Architecture
//!
//! - [`EventFeedErrorTrait`] - Common interface implemented by the unified error
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use eventfeed::error::{Error, EventFeedErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = ?err.category(), "Retrying: {err}");
//!     } else {
//!         tracing::error!("Fatal error: {err}");
//!     }
//! }
//! ```

use thiserror::Error;

pub use crate::notifications::ChannelError;
pub use crate::source::SourceError;

/// Common trait for eventfeed error types
pub trait EventFeedErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Upstream search API errors
    Source,
    /// Delivery channel errors
    Delivery,
    /// Store errors
    Storage,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Delivery => "delivery",
            Self::Storage => "storage",
        }
    }
}

/// Unified error type for the eventfeed crate
#[derive(Error, Debug)]
pub enum Error {
    /// Search API errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Delivery channel errors
    #[error("Delivery error: {0}")]
    Delivery(#[from] ChannelError),

    /// Store errors
    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl EventFeedErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Source(e) => e.is_recoverable(),
            Self::Delivery(e) => e.is_recoverable(),
            Self::Storage(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Source(_) => ErrorCategory::Source,
            Self::Delivery(_) => ErrorCategory::Delivery,
            Self::Storage(_) => ErrorCategory::Storage,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
