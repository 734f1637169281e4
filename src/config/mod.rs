//! Configuration management for eventfeed
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Every section falls back to its defaults, so a
//! file only needs the keys it changes.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::notifications::WebhookConfig;
use crate::scheduler::cleanup::CleanupConfig;
use crate::scheduler::cron::parse_timezone;
use crate::source::ConnpassConfig;
use crate::utils::retry::RetryConfig;

/// Prefix of every environment variable read by [`Config::from_env`]
pub const ENV_PREFIX: &str = "EVENTFEED_";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Retry policy for event source searches
    pub retry: RetryConfig,

    /// Reminder scheduler configuration
    pub notify: NotifyConfig,

    /// Retention sweeps
    pub cleanup: CleanupConfig,

    /// Event source API
    pub api: ConnpassConfig,

    /// Delivery channel
    pub delivery: DeliveryConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Feed scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tick interval in milliseconds
    pub check_interval_ms: u64,

    /// Pause between two feed executions in one tick
    pub rate_limit_delay_ms: u64,

    /// IANA timezone for cron evaluation and calendar dates
    pub timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 60_000,
            rate_limit_delay_ms: 1_100,
            timezone: String::from("Asia/Tokyo"),
        }
    }
}

/// Reminder scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Tick interval in milliseconds
    pub check_interval_ms: u64,

    /// Pause between two users in one cycle
    pub user_delay_ms: u64,

    /// Lifetime of a cached day of events
    pub cache_ttl_ms: u64,

    /// Retention of reminder sent-records in days
    pub sent_retention_days: u32,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 60_000,
            user_delay_ms: 1_100,
            cache_ttl_ms: 30 * 60 * 1000,
            sent_retention_days: 30,
        }
    }
}

/// Delivery channel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Webhook endpoint; without one deliveries are only logged
    pub webhook_url: Option<String>,

    /// Bearer token sent with webhook requests
    pub auth_token: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Retries on transient webhook failures
    pub max_retries: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            auth_token: None,
            timeout_secs: 10,
            max_retries: 2,
        }
    }
}

impl DeliveryConfig {
    /// Webhook settings, if a webhook is configured
    pub fn webhook(&self) -> Option<WebhookConfig> {
        let url = self.webhook_url.as_ref()?;
        let mut config = WebhookConfig::new(url.clone()).with_timeout(self.timeout_secs);
        config.max_retries = self.max_retries;
        if let Some(token) = &self.auth_token {
            config = config.with_auth_token(token.clone());
        }
        Some(config)
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/eventfeed.db"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset variables keep their defaults; set but unparsable ones are errors.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        let s = &mut config.scheduler;
        env_parse("CHECK_INTERVAL_MS", &mut s.check_interval_ms)?;
        env_parse("RATE_LIMIT_DELAY_MS", &mut s.rate_limit_delay_ms)?;
        env_parse("TIMEZONE", &mut s.timezone)?;

        let r = &mut config.retry;
        env_parse("MAX_RETRIES", &mut r.max_retries)?;
        env_parse("RETRY_BASE_DELAY_MS", &mut r.base_delay_ms)?;
        env_parse("RETRY_MAX_DELAY_MS", &mut r.max_delay_ms)?;
        env_parse("RETRY_BACKOFF_MULTIPLIER", &mut r.backoff_multiplier)?;

        let n = &mut config.notify;
        env_parse("NOTIFY_CHECK_INTERVAL_MS", &mut n.check_interval_ms)?;
        env_parse("NOTIFY_USER_DELAY_MS", &mut n.user_delay_ms)?;
        env_parse("NOTIFY_CACHE_TTL_MS", &mut n.cache_ttl_ms)?;
        env_parse("NOTIFY_SENT_RETENTION_DAYS", &mut n.sent_retention_days)?;

        let c = &mut config.cleanup;
        env_parse("CLEANUP_INTERVAL_MS", &mut c.interval_ms)?;
        env_parse("CLEANUP_APP_LOG_DAYS", &mut c.app_log_days)?;
        env_parse("CLEANUP_ACTION_LOG_DAYS", &mut c.action_log_days)?;
        env_parse("CLEANUP_FEED_SENT_EVENT_DAYS", &mut c.feed_sent_event_days)?;
        env_parse("CLEANUP_SUMMARY_CACHE_DAYS", &mut c.summary_cache_days)?;
        env_parse("CLEANUP_NOTIFY_SENT_DAYS", &mut c.notify_sent_days)?;

        let a = &mut config.api;
        env_parse("API_BASE_URL", &mut a.base_url)?;
        a.api_key = env_var("API_KEY").or_else(|| std::env::var("CONNPASS_API_KEY").ok());
        env_parse("API_TIMEOUT_SECS", &mut a.timeout_secs)?;
        env_parse("API_PAGE_SIZE", &mut a.page_size)?;

        let d = &mut config.delivery;
        d.webhook_url = env_var("WEBHOOK_URL");
        d.auth_token = env_var("WEBHOOK_TOKEN");
        env_parse("WEBHOOK_TIMEOUT_SECS", &mut d.timeout_secs)?;
        env_parse("WEBHOOK_MAX_RETRIES", &mut d.max_retries)?;

        env_parse("SQLITE_PATH", &mut config.database.sqlite_path)?;
        env_parse("LOG_LEVEL", &mut config.logging.level)?;
        env_parse("LOG_FORMAT", &mut config.logging.format)?;

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.check_interval_ms == 0 {
            anyhow::bail!("scheduler.check_interval_ms must be greater than 0");
        }
        self.timezone()?;

        self.retry
            .validate()
            .map_err(|e| anyhow::anyhow!("retry: {e}"))?;

        if self.notify.check_interval_ms == 0 {
            anyhow::bail!("notify.check_interval_ms must be greater than 0");
        }

        self.cleanup
            .validate()
            .map_err(|e| anyhow::anyhow!("cleanup: {e}"))?;
        self.api.validate().map_err(|e| anyhow::anyhow!("api: {e}"))?;

        if let Some(webhook) = self.delivery.webhook() {
            webhook
                .validate()
                .map_err(|e| anyhow::anyhow!("delivery: {e}"))?;
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Configured scheduler timezone
    pub fn timezone(&self) -> Result<Tz> {
        Ok(parse_timezone(&self.scheduler.timezone)?)
    }

    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.check_interval_ms)
    }

    #[must_use]
    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.scheduler.rate_limit_delay_ms)
    }

    #[must_use]
    pub fn notify_check_interval(&self) -> Duration {
        Duration::from_millis(self.notify.check_interval_ms)
    }

    #[must_use]
    pub fn notify_user_delay(&self) -> Duration {
        Duration::from_millis(self.notify.user_delay_ms)
    }

    #[must_use]
    pub fn notify_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.notify.cache_ttl_ms)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = env_var(name) {
        *target = raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {ENV_PREFIX}{name}='{raw}': {e}"))?;
    }
    Ok(())
}
