//! Qualification and Scoring
//!
//! Threshold predicates deciding whether a candidate is worth an alert, and
//! the weighted score used to pick the single best candidate of a cycle.
//!
//! Every predicate is optional. A configured predicate whose input field is
//! unknown fails; it is never skipped.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidate::Candidate;

/// Fraction of traded volume paid to liquidity providers when no
/// authoritative fee figure is available
pub const DEX_FEE_RATE: f64 = 0.003;

/// Quote currency per native unit assumed until configured otherwise
pub const DEFAULT_QUOTE_PER_NATIVE: f64 = 150.0;

/// Market cap weight in the score
pub const MARKET_CAP_WEIGHT: f64 = 0.6;

/// Fee weight in the score
pub const FEE_WEIGHT: f64 = 0.4;

/// Threshold configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimum market cap (quote currency)
    pub min_market_cap: Option<f64>,
    /// Maximum market cap (quote currency)
    pub max_market_cap: Option<f64>,
    /// Minimum fee signal in native units
    pub min_fee_native: Option<f64>,
    /// Minimum 1h price change in percent
    pub min_price_change_1h: Option<f64>,
    /// Tokens older than this need a stronger fee signal
    pub freshness_window_hours: f64,
    /// Fee multiplier required from tokens older than the freshness window
    pub stale_fee_multiplier: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_market_cap: Some(250_000.0),
            max_market_cap: Some(10_000_000.0),
            min_fee_native: Some(20.0),
            min_price_change_1h: Some(20.0),
            freshness_window_hours: 2.0,
            stale_fee_multiplier: 2.0,
        }
    }
}

/// Scoring and unit conversion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Market cap normalization unit
    pub cap_unit: f64,
    /// Fee normalization unit (native)
    pub fee_unit: f64,
    /// Quote currency per native unit, used to convert quote fees and volume
    pub quote_per_native: Option<f64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            cap_unit: 1_000_000.0,
            fee_unit: 1.0,
            quote_per_native: Some(DEFAULT_QUOTE_PER_NATIVE),
        }
    }
}

/// Why a candidate failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Rejection {
    MarketCapUnknown,
    MarketCapBelowMin { value: f64, min: f64 },
    MarketCapAboveMax { value: f64, max: f64 },
    FeeUnknown,
    FeeBelowMin { value: f64, min: f64 },
    /// Older than the freshness window and the fee did not clear the stricter bar
    StaleFeeBelowMin { value: f64, required: f64, age_hours: f64 },
    PriceChangeUnknown,
    PriceChangeBelowMin { value: f64, min: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MarketCapUnknown => write!(f, "market cap unknown"),
            Rejection::MarketCapBelowMin { value, min } => {
                write!(f, "market cap {:.0} below min {:.0}", value, min)
            }
            Rejection::MarketCapAboveMax { value, max } => {
                write!(f, "market cap {:.0} above max {:.0}", value, max)
            }
            Rejection::FeeUnknown => write!(f, "fee unknown"),
            Rejection::FeeBelowMin { value, min } => {
                write!(f, "fee {:.2} below min {:.2}", value, min)
            }
            Rejection::StaleFeeBelowMin { value, required, age_hours } => write!(
                f,
                "token {:.1}h old needs fee {:.2}, has {:.2}",
                age_hours, required, value
            ),
            Rejection::PriceChangeUnknown => write!(f, "1h price change unknown"),
            Rejection::PriceChangeBelowMin { value, min } => {
                write!(f, "1h change {:.1}% below min {:.1}%", value, min)
            }
        }
    }
}

/// Result of evaluating one candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub qualifies: bool,
    pub reasons: Vec<Rejection>,
    /// Fee signal in native units, if it could be computed
    pub fee_native: Option<f64>,
}

/// Fee signal in native units.
///
/// An authoritative native figure wins; otherwise quote fees or volume are
/// converted with `quote_per_native`.
pub fn fee_native(candidate: &Candidate, scoring: &ScoringConfig) -> Option<f64> {
    if let Some(fee) = candidate.fee_estimate_native {
        return Some(fee);
    }
    let price = scoring.quote_per_native.filter(|p| *p > 0.0)?;
    if let Some(fee_quote) = candidate.fee_estimate_quote {
        return Some(fee_quote / price);
    }
    candidate
        .volume_24h
        .map(|volume| volume * DEX_FEE_RATE / price)
}

/// Apply every configured predicate to `candidate`
pub fn evaluate(
    candidate: &Candidate,
    thresholds: &Thresholds,
    scoring: &ScoringConfig,
    now: DateTime<Utc>,
) -> Evaluation {
    let mut reasons = Vec::new();

    if thresholds.min_market_cap.is_some() || thresholds.max_market_cap.is_some() {
        match candidate.market_cap {
            None => reasons.push(Rejection::MarketCapUnknown),
            Some(value) => {
                if let Some(min) = thresholds.min_market_cap {
                    if value < min {
                        reasons.push(Rejection::MarketCapBelowMin { value, min });
                    }
                }
                if let Some(max) = thresholds.max_market_cap {
                    if value > max {
                        reasons.push(Rejection::MarketCapAboveMax { value, max });
                    }
                }
            }
        }
    }

    let fee = fee_native(candidate, scoring);
    if let Some(min) = thresholds.min_fee_native {
        match fee {
            None => reasons.push(Rejection::FeeUnknown),
            Some(value) if value < min => reasons.push(Rejection::FeeBelowMin { value, min }),
            Some(value) => {
                let age_hours = candidate
                    .age(now)
                    .map(|age| age.num_seconds() as f64 / 3600.0);
                if let Some(age_hours) = age_hours {
                    let required = min * thresholds.stale_fee_multiplier;
                    if age_hours > thresholds.freshness_window_hours && value < required {
                        reasons.push(Rejection::StaleFeeBelowMin { value, required, age_hours });
                    }
                }
            }
        }
    }

    if let Some(min) = thresholds.min_price_change_1h {
        match candidate.price_change_1h {
            None => reasons.push(Rejection::PriceChangeUnknown),
            Some(value) if value < min => {
                reasons.push(Rejection::PriceChangeBelowMin { value, min })
            }
            Some(_) => {}
        }
    }

    Evaluation {
        qualifies: reasons.is_empty(),
        reasons,
        fee_native: fee,
    }
}

/// Weighted ranking score; unknown inputs contribute zero
pub fn score(candidate: &Candidate, fee_native: Option<f64>, scoring: &ScoringConfig) -> f64 {
    let cap_term = candidate.market_cap.unwrap_or(0.0) / scoring.cap_unit;
    let fee_term = fee_native.unwrap_or(0.0) / scoring.fee_unit;
    MARKET_CAP_WEIGHT * cap_term + FEE_WEIGHT * fee_term
}
