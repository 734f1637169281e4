//! Webhook notification channel
//!
//! This module provides a webhook channel that delivers feed updates and start
//! reminders via HTTP POST requests.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::{ChannelError, ChannelResult};
use crate::models::Event;
use crate::notifications::{DeliveryChannel, FeedDelivery, UserDeliveryChannel};
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Webhook channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL endpoint
    pub url: String,
    /// Optional authentication token (sent as Bearer token)
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Custom headers to include in requests
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Maximum retry attempts on transient failure
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    1000
}

impl WebhookConfig {
    /// Create a new webhook configuration
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            headers: HashMap::new(),
            timeout_secs: default_timeout(),
            max_retries: default_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }

    /// Set authentication token
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Add a custom header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set retry policy
    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Webhook URL cannot be empty".to_string());
        }

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err("Webhook URL must start with http:// or https://".to_string());
        }

        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }

        Ok(())
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig::with_delays(self.max_retries, self.retry_delay_ms, 2.0)
    }
}

/// Webhook notification channel
///
/// # Payload Format
///
/// Feed updates:
///
/// ```json
/// { "kind": "feed", "feed_id": "...", "channel_id": "...", "events": [ ... ] }
/// ```
///
/// Start reminders:
///
/// ```json
/// { "kind": "reminder", "user_id": "...", "events": [ ... ] }
/// ```
pub struct WebhookChannel {
    config: WebhookConfig,
    client: Client,
}

impl WebhookChannel {
    /// Create a new webhook channel
    pub fn new(config: WebhookConfig) -> ChannelResult<Self> {
        config.validate().map_err(ChannelError::InvalidConfig)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChannelError::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Create a simple webhook channel with just a URL
    pub fn from_url(url: impl Into<String>) -> ChannelResult<Self> {
        Self::new(WebhookConfig::new(url))
    }

    /// Get the webhook URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn feed_payload(delivery: &FeedDelivery) -> serde_json::Value {
        serde_json::json!({
            "kind": "feed",
            "feed_id": delivery.feed_id,
            "channel_id": delivery.channel_id,
            "events": delivery.events,
        })
    }

    fn reminder_payload(user_id: &str, events: &[Event]) -> serde_json::Value {
        serde_json::json!({
            "kind": "reminder",
            "user_id": user_id,
            "events": events,
        })
    }

    async fn post_once(&self, payload: &serde_json::Value) -> ChannelResult<()> {
        let mut request = self.client.post(&self.config.url);

        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request.json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(url = %self.config.url, status = %status, "Webhook delivered");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());

        Err(ChannelError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Send the payload, retrying transient failures; client errors fail fast
    async fn send_with_retry(&self, payload: &serde_json::Value) -> ChannelResult<()> {
        let retry = self.config.retry_config();
        with_retry_if(&retry, || self.post_once(payload), ChannelError::is_recoverable).await
    }
}

#[async_trait]
impl DeliveryChannel for WebhookChannel {
    async fn handle_new_events(&self, delivery: &FeedDelivery) -> ChannelResult<()> {
        let payload = Self::feed_payload(delivery);
        self.send_with_retry(&payload).await.inspect_err(|e| {
            tracing::error!(
                url = %self.config.url,
                feed_id = %delivery.feed_id,
                error = %e,
                "Failed to deliver feed update"
            );
        })
    }
}

#[async_trait]
impl UserDeliveryChannel for WebhookChannel {
    async fn send_event_notification(&self, user_id: &str, events: &[Event]) -> ChannelResult<()> {
        let payload = Self::reminder_payload(user_id, events);
        self.send_with_retry(&payload).await.inspect_err(|e| {
            tracing::error!(
                url = %self.config.url,
                user_id = %user_id,
                error = %e,
                "Failed to deliver reminder"
            );
        })
    }
}
