//! Candidate tokens
//!
//! A candidate is the per-cycle view of one observed token. Market figures
//! are optional: a source that does not report a field leaves it `None`
//! rather than zero, so downstream predicates can tell "unknown" from a real
//! zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shortest accepted base-58 address
pub const MIN_ADDRESS_LEN: usize = 32;
/// Longest accepted base-58 address
pub const MAX_ADDRESS_LEN: usize = 44;
/// Decoded public key length
const PUBKEY_BYTES: usize = 32;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CandidateError {
    #[error("Malformed record from {source_name}: {reason}")]
    MalformedRecord { source_name: String, reason: String },
}

/// One record as normalized by a source adapter, before validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSnapshot {
    pub address: Option<String>,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    pub fee_native: Option<f64>,
    pub fee_quote: Option<f64>,
    pub price_change_1h: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Validated token observed during one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// Token mint address (base-58)
    pub address: String,
    pub symbol: String,
    pub name: String,
    /// Market cap in quote currency (USD)
    pub market_cap: Option<f64>,
    /// 24h traded volume in quote currency
    pub volume_24h: Option<f64>,
    /// Authoritative fee figure in native units (SOL), when the source has one
    pub fee_estimate_native: Option<f64>,
    /// Fee figure in quote currency
    pub fee_estimate_quote: Option<f64>,
    /// 1h price change in percent
    pub price_change_1h: Option<f64>,
    /// 24h price change in percent
    pub price_change_24h: Option<f64>,
    pub observed_at: DateTime<Utc>,
    /// Token creation time, if reported
    pub created_at: Option<DateTime<Utc>>,
    /// Key of the source that reported this candidate
    pub source: String,
}

impl Candidate {
    /// Validate a raw snapshot into a candidate
    pub fn from_snapshot(
        snapshot: RawSnapshot,
        source: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, CandidateError> {
        let malformed = |reason: String| CandidateError::MalformedRecord {
            source_name: source.to_string(),
            reason,
        };

        let address = snapshot
            .address
            .map(|a| a.trim().to_string())
            .ok_or_else(|| malformed("missing address".to_string()))?;

        if !is_valid_address(&address) {
            return Err(malformed(format!("invalid address '{}'", address)));
        }

        let symbol = snapshot
            .symbol
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| short_address(&address));
        let name = snapshot.name.unwrap_or_else(|| symbol.clone());

        Ok(Self {
            address,
            symbol,
            name,
            market_cap: finite(snapshot.market_cap),
            volume_24h: finite(snapshot.volume_24h),
            fee_estimate_native: finite(snapshot.fee_native),
            fee_estimate_quote: finite(snapshot.fee_quote),
            price_change_1h: finite(snapshot.price_change_1h),
            price_change_24h: finite(snapshot.price_change_24h),
            observed_at,
            created_at: snapshot.created_at,
            source: source.to_string(),
        })
    }

    /// Age since creation, if the creation time is known
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.created_at.map(|created| now - created)
    }
}

/// Base-58, 32-44 characters, decoding to a 32-byte public key
pub fn is_valid_address(address: &str) -> bool {
    if address.len() < MIN_ADDRESS_LEN || address.len() > MAX_ADDRESS_LEN {
        return false;
    }
    match bs58::decode(address).into_vec() {
        Ok(bytes) => bytes.len() == PUBKEY_BYTES,
        Err(_) => false,
    }
}

/// `Abcd...wxyz` form for logs and fallback symbols
pub fn short_address(address: &str) -> String {
    if address.len() <= 8 {
        return address.to_string();
    }
    format!("{}...{}", &address[..4], &address[address.len() - 4..])
}

/// NaN and infinities are not market data
fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}
