//! Top-traded token listing
//!
//! Bulk list of tokens sorted by 24h volume with server-side market cap
//! bounds. Birdeye-style `tokenlist` responses are the primary shape; a few
//! alternative field spellings are accepted as fallbacks.

use async_trait::async_trait;

use super::client::{records_at, FeedHttpClient, HttpSourceConfig, DEFAULT_BULK_TIMEOUT_SECS};
use super::fields::FieldMap;
use crate::domain::RawSnapshot;
use crate::ports::{CandidateSource, FilterParams, SourceError};

pub const TOP_TRADED_KEY: &str = "top_traded";
pub const DEFAULT_TOP_TRADED_URL: &str = "https://public-api.birdeye.so/defi/tokenlist";

/// Upstream page size cap
const MAX_LIMIT: usize = 50;

const RECORD_PATHS: &[&str] = &["/data/tokens", "/data/items", "/tokens", "/data"];

static FIELDS: FieldMap = FieldMap {
    address: &["/address", "/mint", "/tokenAddress"],
    symbol: &["/symbol"],
    name: &["/name"],
    market_cap: &["/mc", "/marketCap", "/market_cap", "/fdv"],
    volume_24h: &["/v24hUSD", "/volume24hUSD", "/volume_24h"],
    fee_native: &["/fees24hSol", "/fee_native"],
    fee_quote: &["/fees24hUSD", "/fee_quote"],
    price_change_1h: &["/priceChange1hPercent", "/v1hChangePercent", "/price_change_1h"],
    price_change_24h: &["/v24hChangePercent", "/priceChange24hPercent", "/price_change_24h"],
    created_at: &["/createdAt", "/creationTime", "/created_at"],
};

pub fn default_config() -> HttpSourceConfig {
    HttpSourceConfig::new(DEFAULT_TOP_TRADED_URL, DEFAULT_BULK_TIMEOUT_SECS)
}

/// Volume-sorted token list source
#[derive(Debug, Clone)]
pub struct TopTradedSource {
    client: FeedHttpClient,
}

impl TopTradedSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: FeedHttpClient::new(TOP_TRADED_KEY, config)?,
        })
    }

    fn query(params: &FilterParams) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("sort_by", "v24hUSD".to_string()),
            ("sort_type", "desc".to_string()),
            ("offset", "0".to_string()),
            ("limit", params.limit.clamp(1, MAX_LIMIT).to_string()),
        ];
        if let Some(min) = params.min_market_cap {
            query.push(("min_market_cap", format!("{:.0}", min)));
        }
        if let Some(max) = params.max_market_cap {
            query.push(("max_market_cap", format!("{:.0}", max)));
        }
        query
    }
}

#[async_trait]
impl CandidateSource for TopTradedSource {
    fn key(&self) -> &str {
        self.client.key()
    }

    async fn fetch(&self, params: &FilterParams) -> Result<Vec<RawSnapshot>, SourceError> {
        let body = self.client.get_json(&Self::query(params)).await?;
        let records = records_at(&body, RECORD_PATHS).ok_or_else(|| {
            SourceError::unavailable(TOP_TRADED_KEY, "response has no token list")
        })?;
        Ok(records.iter().map(|r| FIELDS.snapshot(r)).collect())
    }
}
