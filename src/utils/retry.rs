//! Retry utilities for resilient upstream calls
//!
//! This module provides the retry mechanism with exponential backoff used by the
//! feed executor and the webhook channel, together with the message-based
//! classification of transient failures.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Message fragments (lower-case) that mark an error as transient
const TRANSIENT_PATTERNS: &[&str] = &[
    // network level
    "econnreset",
    "econnrefused",
    "etimedout",
    "enotfound",
    "eai_again",
    "timeout",
    "timed out",
    "network",
    "fetch failed",
    "socket hang up",
    "connection reset",
    "connection refused",
    // server side
    "500",
    "502",
    "503",
    "504",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    // throttling
    "429",
    "too many requests",
    "rate limit",
];

/// Classify an error message as transient (worth retrying)
///
/// Matching is case-insensitive and substring based; anything not matched is
/// treated as permanent.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (total attempts = max_retries + 1)
    pub max_retries: u32,

    /// Delay in milliseconds before the first retry
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after every retry
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom max retries
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create a retry configuration with custom delays
    pub fn with_delays(max_retries: u32, base_delay_ms: u64, backoff_multiplier: f64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            backoff_multiplier,
            ..Default::default()
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier > 0.0) {
            return Err(format!(
                "backoff_multiplier must be positive, got {}",
                self.backoff_multiplier
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must not be smaller than base_delay_ms".to_string());
        }
        Ok(())
    }

    /// Calculate delay for a given attempt using exponential backoff
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = if attempt == 0 {
            0
        } else {
            let exponential =
                self.base_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
            (exponential as u64).min(self.max_delay_ms)
        };

        Duration::from_millis(delay_ms)
    }
}

/// Execute an operation with retry logic, using a custom retry predicate
///
/// Attempts run `0..=max_retries`. An error rejected by `should_retry` is
/// returned immediately; otherwise the last error is returned once retries are
/// exhausted.
///
/// # Example
///
/// ```no_run
/// use eventfeed::utils::retry::{is_transient_message, with_retry_if, RetryConfig};
///
/// async fn fetch_data() -> Result<String, String> {
///     Ok("data".to_string())
/// }
///
/// # async fn run() -> Result<(), String> {
/// let config = RetryConfig::default();
/// let data = with_retry_if(
///     &config,
///     || async { fetch_data().await },
///     |e| is_transient_message(e),
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = config.calculate_delay(attempt);
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis(),
                "Retrying operation after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    warn!(error = %e, "Non-retryable error encountered");
                    return Err(e);
                }

                if attempt >= config.max_retries {
                    warn!(
                        attempt = attempt,
                        max_retries = config.max_retries,
                        error = %e,
                        "Retries exhausted"
                    );
                    return Err(e);
                }

                warn!(
                    attempt = attempt,
                    max_retries = config.max_retries,
                    error = %e,
                    "Operation failed, will retry"
                );
            }
        }

        attempt += 1;
    }
}
