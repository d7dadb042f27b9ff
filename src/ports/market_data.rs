//! Market data port
//!
//! Contract every feed adapter implements. An adapter fetches one upstream
//! listing and normalizes each record into a [`RawSnapshot`]; validation into
//! candidates happens in the core.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::RawSnapshot;

/// Source adapter errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Upstream answered with a throttle signal; route into the breaker
    #[error("Rate limited by {source_name}")]
    RateLimited {
        source_name: String,
        /// Upstream hint, when the response carried one
        retry_after: Option<Duration>,
    },

    /// Non-2xx response, timeout, transport or decode failure
    #[error("Source {source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },
}

impl SourceError {
    pub fn unavailable(source: &str, reason: impl Into<String>) -> Self {
        SourceError::SourceUnavailable {
            source_name: source.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SourceError::RateLimited { .. })
    }
}

/// Filter parameters handed to a source on every fetch
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterParams {
    pub min_market_cap: Option<f64>,
    pub max_market_cap: Option<f64>,
    /// Maximum records to request
    pub limit: usize,
    /// Free-text query for search style feeds
    pub query: Option<String>,
}

/// A pluggable upstream feed
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Key identifying the upstream endpoint; feeds sharing a key share a rate governor
    fn key(&self) -> &str;

    /// Fetch and normalize one listing
    async fn fetch(&self, params: &FilterParams) -> Result<Vec<RawSnapshot>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_display() {
        let err = SourceError::RateLimited {
            source_name: "top_traded".to_string(),
            retry_after: None,
        };
        assert!(err.to_string().contains("Rate limited"));
        assert!(err.is_rate_limited());

        let err = SourceError::unavailable("search", "HTTP 503");
        assert!(err.to_string().contains("HTTP 503"));
        assert!(!err.is_rate_limited());
    }
}
