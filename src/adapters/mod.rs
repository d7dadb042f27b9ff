//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Market Data: HTTP feed sources for token listings
//! - Notifier: webhook and dry-run alert delivery
//! - CLI: Command-line interface definitions

pub mod cli;
pub mod market_data;
pub mod notifier;

pub use cli::CliApp;
pub use market_data::{HttpSourceConfig, SearchSource, TopTradedSource};
pub use notifier::{LogNotifier, WebhookNotifier};
