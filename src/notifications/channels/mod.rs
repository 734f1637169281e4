//! Notification channels for delivering events
//!
//! This module provides the concrete sinks behind
//! [`DeliveryChannel`](crate::notifications::DeliveryChannel) and
//! [`UserDeliveryChannel`](crate::notifications::UserDeliveryChannel).

pub mod log;
pub mod webhook;

use crate::utils::retry::is_transient_message;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur during channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Invalid channel configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error
    #[error("Channel error: {0}")]
    Other(String),
}

impl ChannelError {
    /// Whether a retry could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidConfig(_) => false,
            Self::Other(msg) => is_transient_message(msg),
        }
    }
}
