//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Cron expression could not be parsed
    InvalidCron {
        expr: String,
        reason: String,
    },

    /// Cron expression never fires again
    NoUpcomingRun {
        expr: String,
    },

    /// Invalid timezone
    InvalidTimezone {
        tz: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCron { expr, reason } => {
                write!(f, "Invalid cron expression '{}': {}", expr, reason)
            }
            Self::NoUpcomingRun { expr } => {
                write!(f, "Cron expression '{}' has no upcoming run", expr)
            }
            Self::InvalidTimezone { tz } => {
                write!(f, "Invalid timezone: {}", tz)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an invalid cron error
    pub fn invalid_cron(expr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCron {
            expr: expr.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid timezone error
    pub fn invalid_timezone(tz: impl Into<String>) -> Self {
        Self::InvalidTimezone { tz: tz.into() }
    }
}
