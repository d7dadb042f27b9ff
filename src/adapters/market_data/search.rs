//! Pair search source
//!
//! Free-text pair search (DexScreener-style `search?q=`). The endpoint has no
//! server-side market cap filter, so bounds are applied after mapping and the
//! result is truncated to the requested limit.

use async_trait::async_trait;
use serde_json::Value;

use super::client::{records_at, FeedHttpClient, HttpSourceConfig, DEFAULT_SEARCH_TIMEOUT_SECS};
use super::fields::{extract_string, FieldMap};
use crate::domain::RawSnapshot;
use crate::ports::{CandidateSource, FilterParams, SourceError};

pub const SEARCH_KEY: &str = "search";
pub const DEFAULT_SEARCH_URL: &str = "https://api.dexscreener.com/latest/dex/search";

/// Query used when a feed does not configure one
pub const DEFAULT_QUERY: &str = "SOL";

const CHAIN: &str = "solana";

const RECORD_PATHS: &[&str] = &["/pairs", "/data/pairs"];

static FIELDS: FieldMap = FieldMap {
    address: &["/baseToken/address"],
    symbol: &["/baseToken/symbol"],
    name: &["/baseToken/name"],
    market_cap: &["/marketCap", "/fdv"],
    volume_24h: &["/volume/h24"],
    fee_native: &[],
    fee_quote: &[],
    price_change_1h: &["/priceChange/h1"],
    price_change_24h: &["/priceChange/h24"],
    created_at: &["/pairCreatedAt"],
};

pub fn default_config() -> HttpSourceConfig {
    HttpSourceConfig::new(DEFAULT_SEARCH_URL, DEFAULT_SEARCH_TIMEOUT_SECS)
}

/// Pair search source
#[derive(Debug, Clone)]
pub struct SearchSource {
    client: FeedHttpClient,
}

impl SearchSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: FeedHttpClient::new(SEARCH_KEY, config)?,
        })
    }
}

/// Map search pairs into snapshots, keeping one pair per base token
pub fn map_pairs(records: &[Value], params: &FilterParams) -> Vec<RawSnapshot> {
    let mut seen = std::collections::HashSet::new();
    records
        .iter()
        .filter(|pair| {
            extract_string(pair, &["/chainId"])
                .map(|chain| chain == CHAIN)
                .unwrap_or(true)
        })
        .map(|pair| FIELDS.snapshot(pair))
        .filter(|s| within_bounds(s.market_cap, params))
        .filter(|s| match &s.address {
            Some(address) => seen.insert(address.clone()),
            None => true,
        })
        .take(params.limit.max(1))
        .collect()
}

/// Unknown market caps pass; qualification rejects them later
fn within_bounds(market_cap: Option<f64>, params: &FilterParams) -> bool {
    let Some(cap) = market_cap else {
        return true;
    };
    params.min_market_cap.map_or(true, |min| cap >= min)
        && params.max_market_cap.map_or(true, |max| cap <= max)
}

#[async_trait]
impl CandidateSource for SearchSource {
    fn key(&self) -> &str {
        self.client.key()
    }

    async fn fetch(&self, params: &FilterParams) -> Result<Vec<RawSnapshot>, SourceError> {
        let q = params
            .query
            .clone()
            .unwrap_or_else(|| DEFAULT_QUERY.to_string());
        let body = self.client.get_json(&[("q", q)]).await?;
        let records = records_at(&body, RECORD_PATHS)
            .ok_or_else(|| SourceError::unavailable(SEARCH_KEY, "response has no pairs"))?;
        Ok(map_pairs(records, params))
    }
}
