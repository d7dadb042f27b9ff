//! DLMM Liquidity Cost Estimator
//!
//! Pure arithmetic estimating the rent a liquidity provider pays to open a
//! position over a bin range. Bins are grouped into fixed-size regions (bin
//! arrays); a position covers a fixed number of bins before it needs
//! extension accounts.
//!
//! All amounts are lamports. Rent-exempt minimums follow
//! `(account_bytes + 128) * 6960`.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

/// Bins per region (bin array)
pub const REGION_SIZE: i32 = 70;

/// Bins a fresh position covers without extension accounts
pub const CAPACITY_WITHOUT_EXTENSION: u32 = 69;

/// Lamports per SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Rent for a position account (8120 bytes), refundable on close
pub const POSITION_RENT_LAMPORTS: u64 = 57_406_080;

/// Rent for one extension chunk of 70 bins (7840 bytes), refundable on close
pub const EXTENSION_RENT_LAMPORTS: u64 = 54_566_400;

/// Rent for a bin array account (10136 bytes), never refunded
pub const BIN_ARRAY_RENT_LAMPORTS: u64 = 71_437_440;

/// Bin step used when a pool's step is not known
pub const DEFAULT_BIN_STEP: u16 = 100;

/// Basis points denominator for bin steps
const BPS_DENOMINATOR: f64 = 10_000.0;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EstimateError {
    #[error("Invalid bin range: min {min} > max {max}")]
    InvalidRange { min: i32, max: i32 },
    #[error("Bin step must be > 0")]
    InvalidBinStep,
}

/// What is known about regions already initialized on-chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionMembership {
    /// Region indices that already exist
    Known(HashSet<i64>),
    /// No authoritative on-chain check available
    Unknown,
}

/// Inputs to one estimate
#[derive(Debug, Clone)]
pub struct EstimateRequest {
    pub min_bin_id: i32,
    pub max_bin_id: i32,
    pub bin_step: u16,
    /// Existing position address; `None` means a new position is created
    pub position: Option<String>,
    pub regions: RegionMembership,
}

impl EstimateRequest {
    /// New position over `[min_bin_id, max_bin_id]` with unknown region membership
    pub fn new_position(min_bin_id: i32, max_bin_id: i32, bin_step: u16) -> Self {
        Self {
            min_bin_id,
            max_bin_id,
            bin_step,
            position: None,
            regions: RegionMembership::Unknown,
        }
    }

    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position = Some(position.into());
        self
    }

    pub fn with_known_regions(mut self, regions: impl IntoIterator<Item = i64>) -> Self {
        self.regions = RegionMembership::Known(regions.into_iter().collect());
        self
    }
}

/// Cost breakdown for opening liquidity over a bin range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeEstimate {
    /// Position + extension rent, returned when the position closes
    pub refundable_total: u64,
    /// Region creation rent, never returned
    pub non_refundable_total: u64,
    pub position_rent: u64,
    pub extension_rent: u64,
    pub binarray_rent: u64,
    pub bin_count: u32,
    pub needs_extension: bool,
    pub extensions_needed: u32,
    pub regions_spanned: u32,
    /// Regions that must be created
    pub new_bins_region_count: u32,
    /// True when region membership was guessed rather than checked on-chain
    pub approximate: bool,
}

impl FeeEstimate {
    pub fn total(&self) -> u64 {
        self.refundable_total + self.non_refundable_total
    }

    pub fn total_sol(&self) -> f64 {
        lamports_to_sol(self.total())
    }
}

/// Region index containing `bin_id`
pub fn boundary_index(bin_id: i32) -> i64 {
    i64::from(bin_id.div_euclid(REGION_SIZE))
}

/// Bins in `[min_bin_id, max_bin_id]`; `None` when the range is inverted or
/// too wide to count in a `u32`
pub fn bin_count(min_bin_id: i32, max_bin_id: i32) -> Option<u32> {
    u32::try_from(i64::from(max_bin_id) - i64::from(min_bin_id) + 1).ok()
}

/// Extension chunks needed beyond the base position capacity
pub fn extensions_needed(bin_count: u32) -> u32 {
    if bin_count <= CAPACITY_WITHOUT_EXTENSION {
        return 0;
    }
    let overflow = bin_count - CAPACITY_WITHOUT_EXTENSION;
    overflow.div_ceil(REGION_SIZE as u32)
}

pub fn regions_spanned(min_bin_id: i32, max_bin_id: i32) -> Option<u32> {
    u32::try_from(boundary_index(max_bin_id) - boundary_index(min_bin_id) + 1).ok()
}

/// Price of `bin_id` relative to bin 0
pub fn bin_price(bin_id: i32, bin_step: u16) -> f64 {
    (1.0 + f64::from(bin_step) / BPS_DENOMINATOR).powi(bin_id)
}

/// Relative price bounds covered by a bin range
pub fn price_range(min_bin_id: i32, max_bin_id: i32, bin_step: u16) -> (f64, f64) {
    (bin_price(min_bin_id, bin_step), bin_price(max_bin_id, bin_step))
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Estimate rent costs for a liquidity position
pub fn estimate(request: &EstimateRequest) -> Result<FeeEstimate, EstimateError> {
    let invalid_range = EstimateError::InvalidRange {
        min: request.min_bin_id,
        max: request.max_bin_id,
    };
    if request.min_bin_id > request.max_bin_id {
        return Err(invalid_range);
    }
    if request.bin_step == 0 {
        return Err(EstimateError::InvalidBinStep);
    }

    let bin_count = bin_count(request.min_bin_id, request.max_bin_id).ok_or(invalid_range.clone())?;
    let extensions_needed = extensions_needed(bin_count);
    let needs_extension = extensions_needed > 0;

    let position_rent = if request.position.is_none() {
        POSITION_RENT_LAMPORTS
    } else {
        0
    };
    let extension_rent = u64::from(extensions_needed) * EXTENSION_RENT_LAMPORTS;

    let first_region = boundary_index(request.min_bin_id);
    let last_region = boundary_index(request.max_bin_id);
    let regions_spanned =
        regions_spanned(request.min_bin_id, request.max_bin_id).ok_or(invalid_range)?;

    let (new_regions, approximate) = match &request.regions {
        RegionMembership::Known(existing) => {
            let missing = (first_region..=last_region)
                .filter(|idx| !existing.contains(idx))
                .count() as u32;
            (missing, false)
        }
        // Cap at one new region rather than assuming none or all
        RegionMembership::Unknown => (regions_spanned.min(1), true),
    };
    let binarray_rent = u64::from(new_regions) * BIN_ARRAY_RENT_LAMPORTS;

    Ok(FeeEstimate {
        refundable_total: position_rent + extension_rent,
        non_refundable_total: binarray_rent,
        position_rent,
        extension_rent,
        binarray_rent,
        bin_count,
        needs_extension,
        extensions_needed,
        regions_spanned,
        new_bins_region_count: new_regions,
        approximate,
    })
}
