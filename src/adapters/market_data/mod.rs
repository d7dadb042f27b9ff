//! Market Data Adapters
//!
//! Feed sources implementing [`CandidateSource`](crate::ports::CandidateSource):
//! - `TopTradedSource`: volume-sorted token list with market cap bounds
//! - `SearchSource`: free-text pair search
//!
//! Both share `FeedHttpClient` for status mapping (429 → rate limited) and
//! `FieldMap` for ordered field fallbacks.

mod client;
mod fields;
mod search;
mod top_traded;

pub use client::{
    retry_after, FeedHttpClient, HttpSourceConfig, DEFAULT_BULK_TIMEOUT_SECS,
    DEFAULT_SEARCH_TIMEOUT_SECS,
};
pub use fields::{extract_datetime, extract_f64, extract_string, FieldMap};
pub use search::{SearchSource, DEFAULT_QUERY, DEFAULT_SEARCH_URL, SEARCH_KEY};
pub use top_traded::{TopTradedSource, DEFAULT_TOP_TRADED_URL, TOP_TRADED_KEY};

/// Default connection settings for the top-traded listing
pub fn default_top_traded_config() -> HttpSourceConfig {
    top_traded::default_config()
}

/// Default connection settings for pair search
pub fn default_search_config() -> HttpSourceConfig {
    search::default_config()
}
