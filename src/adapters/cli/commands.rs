//! CLI Command Definitions
//!
//! Argument structures for every subcommand of the scout binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::fee_estimator::DEFAULT_BIN_STEP;

const DEFAULT_CONFIG: &str = "config/scout.toml";

/// dlmm-scout - Rate-governed token feed poller with DLMM fee estimates
#[derive(Parser, Debug)]
#[command(
    name = "dlmm-scout",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "Rate-governed token feed poller with deduplicated DLMM alerts",
    long_about = "dlmm-scout polls market-data feeds under per-source rate limits, \
                  qualifies and scores tokens, estimates the rent of a DLMM liquidity \
                  position for the winner and notifies each address at most once per epoch."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start all feed loops until Ctrl+C
    Run(RunCmd),

    /// Run one cycle per feed and print the reports
    Once(RunCmd),

    /// Estimate DLMM position rent for a bin range
    Estimate(EstimateCmd),

    /// List notification records and their age
    Status(StatusCmd),

    /// Load and validate the configuration
    Check(CheckCmd),
}

/// Poll feeds (shared by `run` and `once`)
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Log alerts instead of delivering them
    #[arg(long)]
    pub dry_run: bool,
}

/// Rent estimate for a bin range
#[derive(Parser, Debug)]
pub struct EstimateCmd {
    /// Lowest bin id of the range
    #[arg(long, value_name = "BIN", allow_negative_numbers = true)]
    pub min_bin: i32,

    /// Highest bin id of the range
    #[arg(long, value_name = "BIN", allow_negative_numbers = true)]
    pub max_bin: i32,

    /// Pool bin step in basis points
    #[arg(long, value_name = "BPS", default_value_t = DEFAULT_BIN_STEP)]
    pub bin_step: u16,

    /// Existing position address (skips position rent)
    #[arg(long, value_name = "ADDR")]
    pub position: Option<String>,

    /// Region indexes that already exist on-chain (comma separated)
    #[arg(long, value_name = "IDX", value_delimiter = ',', allow_negative_numbers = true)]
    pub regions: Option<Vec<i64>>,

    /// Print the estimate as JSON
    #[arg(long)]
    pub json: bool,
}

/// Dedup store status
#[derive(Parser, Debug)]
pub struct StatusCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Output format (text, json)
    #[arg(short, long, value_name = "FORMAT", default_value = "text")]
    pub format: String,
}

/// Configuration check
#[derive(Parser, Debug)]
pub struct CheckCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,
}
