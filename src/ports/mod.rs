//! Ports Layer - Trait definitions for external dependencies
//!
//! Interfaces the adapters implement, following hexagonal architecture:
//! - Market data feeds (token listings)
//! - Alert delivery

pub mod market_data;
pub mod notifier;
pub mod mocks;

pub use market_data::{CandidateSource, FilterParams, SourceError};
pub use notifier::{Alert, Notifier, NotifyError};
pub use mocks::{MockNotifier, MockSource};
