//! Shared HTTP plumbing for feed sources
//!
//! Maps transport outcomes onto the source error taxonomy: 429 becomes
//! `RateLimited` (with the `Retry-After` hint when present), anything else
//! that is not a decodable 2xx body becomes `SourceUnavailable`. No retries
//! happen here; retry policy belongs to the rate governor.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ports::SourceError;

/// Timeout for search and metadata lookups
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 10;

/// Timeout for bulk list queries
pub const DEFAULT_BULK_TIMEOUT_SECS: u64 = 30;

/// Connection settings for one HTTP source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    /// Endpoint URL
    pub url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// API key sent in the `X-API-KEY` header, if the upstream needs one
    #[serde(default)]
    pub api_key: Option<String>,
}

impl HttpSourceConfig {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            url: url.into(),
            timeout_secs,
            api_key: None,
        }
    }

    /// Builder method setting the API key
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// JSON-over-HTTP client bound to one source key
#[derive(Debug, Clone)]
pub struct FeedHttpClient {
    key: String,
    config: HttpSourceConfig,
    http: Client,
}

impl FeedHttpClient {
    pub fn new(key: impl Into<String>, config: HttpSourceConfig) -> Result<Self, SourceError> {
        let key = key.into();
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SourceError::unavailable(&key, format!("client build failed: {}", e)))?;
        Ok(Self { key, config, http })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &HttpSourceConfig {
        &self.config
    }

    /// GET the configured endpoint with `query` and decode the body as JSON
    pub async fn get_json(&self, query: &[(&str, String)]) -> Result<Value, SourceError> {
        let mut request = self
            .http
            .get(&self.config.url)
            .query(query)
            .header("accept", "application/json")
            .header("x-chain", "solana");
        if let Some(api_key) = &self.config.api_key {
            request = request.header("X-API-KEY", api_key);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after(response.headers());
            tracing::warn!(
                source = %self.key,
                retry_after = ?retry_after,
                "Upstream returned 429"
            );
            return Err(SourceError::RateLimited {
                source_name: self.key.clone(),
                retry_after,
            });
        }

        if !status.is_success() {
            return Err(SourceError::unavailable(&self.key, format!("HTTP {}", status)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| SourceError::unavailable(&self.key, format!("undecodable body: {}", e)))
    }

    fn transport_error(&self, err: reqwest::Error) -> SourceError {
        let reason = if err.is_timeout() {
            format!("timed out after {}s", self.config.timeout_secs)
        } else {
            format!("transport error: {}", err)
        };
        SourceError::unavailable(&self.key, reason)
    }
}

/// `Retry-After` in delta-seconds form
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Records array at the first of `paths` that holds one
pub fn records_at<'a>(body: &'a Value, paths: &[&str]) -> Option<&'a Vec<Value>> {
    paths
        .iter()
        .find_map(|path| body.pointer(path).and_then(Value::as_array))
}
