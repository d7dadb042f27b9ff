//! Configuration Module
//!
//! Loads and validates configuration from TOML files with `SCOUT_*`
//! environment overrides.

pub mod loader;

pub use loader::{
    load_config, load_config_with, Config, ConfigError, DedupSection, EstimatorSection,
    FeedSection, LoggingSection, NotifierSection, SourcesSection,
};
