//! HTTP client for the connpass event search API (v2)
//!
//! Maps [`SearchParams`] onto the `/events/` endpoint. Every failure is turned
//! into a [`SourceError`] whose text carries enough wording for transient
//! classification: statuses render as `HTTP <code> <reason>`, transport
//! failures mention the network condition.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{EventSource, SearchParams, SearchResponse, SourceError};

/// Connection settings for [`ConnpassClient`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnpassConfig {
    /// API root, without the trailing `/events/`
    pub base_url: String,
    /// Value of the `X-API-Key` header
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Default page size for searches
    pub page_size: u32,
}

impl Default for ConnpassConfig {
    fn default() -> Self {
        Self {
            base_url: "https://connpass.com/api/v2".to_string(),
            api_key: None,
            timeout_secs: 30,
            page_size: 100,
        }
    }
}

impl ConnpassConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("API base_url must start with http:// or https://".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("API timeout must be greater than 0".to_string());
        }
        if self.page_size == 0 || self.page_size > 100 {
            return Err("API page_size must be between 1 and 100".to_string());
        }
        Ok(())
    }
}

/// reqwest-backed [`EventSource`]
pub struct ConnpassClient {
    client: Client,
    config: ConnpassConfig,
}

impl ConnpassClient {
    /// Create a new client
    pub fn new(config: ConnpassConfig) -> Result<Self, SourceError> {
        config.validate().map_err(SourceError::Other)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("eventfeed/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|e| SourceError::Other(format!("Invalid user agent: {e}")))?,
        );
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| SourceError::Other(format!("Invalid API key header: {e}")))?;
            headers.insert("X-API-Key", value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .default_headers(headers)
            .build()
            .map_err(|e| SourceError::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Default page size
    pub fn page_size(&self) -> u32 {
        self.config.page_size
    }

    fn events_url(&self) -> String {
        format!("{}/events/", self.config.base_url.trim_end_matches('/'))
    }

    /// Flatten search parameters into repeated query pairs
    pub fn query_pairs(&self, params: &SearchParams) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();

        for keyword in &params.keywords_and {
            query.push(("keyword", keyword.clone()));
        }
        for keyword in &params.keywords_or {
            query.push(("keyword_or", keyword.clone()));
        }
        for location in &params.locations {
            query.push(("prefecture", location.clone()));
        }
        for date in params.dates() {
            query.push(("ymd", date.format("%Y%m%d").to_string()));
        }
        if let Some(owner) = &params.owner_nickname {
            query.push(("owner_nickname", owner.clone()));
        }
        if let Some(nickname) = &params.nickname {
            query.push(("nickname", nickname.clone()));
        }
        if let Some(order) = params.order {
            query.push(("order", order.code().to_string()));
        }
        query.push((
            "count",
            params.count.unwrap_or(self.config.page_size).to_string(),
        ));

        query
    }
}

fn map_transport_error(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Network(format!("request timeout: {err}"))
    } else if err.is_connect() {
        SourceError::Network(format!("connection refused: {err}"))
    } else if err.is_decode() {
        SourceError::Decode(err.to_string())
    } else {
        SourceError::Network(err.to_string())
    }
}

#[async_trait]
impl EventSource for ConnpassClient {
    async fn search(&self, params: &SearchParams) -> Result<SearchResponse, SourceError> {
        let url = self.events_url();
        let query = self.query_pairs(params);

        tracing::debug!(url = %url, params = query.len(), "Searching events");

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = response.text().await.map_err(map_transport_error)?;
        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()))?;

        tracing::debug!(
            returned = parsed.results_returned,
            available = parsed.results_available,
            "Event search completed"
        );

        Ok(parsed)
    }
}
