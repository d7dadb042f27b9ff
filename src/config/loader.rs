//! Configuration Loader
//!
//! Loads the scout configuration from a TOML file, applies `SCOUT_*`
//! environment overrides and validates the result. Every section has serde
//! defaults, so an empty file is a complete configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::adapters::market_data::{
    default_search_config, default_top_traded_config, HttpSourceConfig, SEARCH_KEY,
    TOP_TRADED_KEY,
};
use crate::domain::fee_estimator::DEFAULT_BIN_STEP;
use crate::domain::notification_store::{default_path, DEFAULT_EPOCH_HOURS};
use crate::domain::{GovernorConfig, ScoringConfig, Thresholds};

/// Flat minimum spacing for the search source
const SEARCH_DELAY_MS: u64 = 3_000;

/// Directory holding the default state file
const DEFAULT_DATA_DIR: &str = "data";

/// Env value that disables an optional threshold
const DISABLED: &str = "off";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feeds: Vec<FeedSection>,
    pub thresholds: Thresholds,
    pub scoring: ScoringConfig,
    /// Limiter settings keyed by source key
    pub governors: BTreeMap<String, GovernorConfig>,
    pub dedup: DedupSection,
    pub estimator: EstimatorSection,
    pub sources: SourcesSection,
    pub notifier: NotifierSection,
    pub logging: LoggingSection,
}

impl Default for Config {
    fn default() -> Self {
        let mut governors = BTreeMap::new();
        governors.insert(TOP_TRADED_KEY.to_string(), GovernorConfig::default());
        governors.insert(SEARCH_KEY.to_string(), GovernorConfig::flat(SEARCH_DELAY_MS));

        Self {
            feeds: vec![
                FeedSection::new("top_traded", TOP_TRADED_KEY),
                FeedSection {
                    query: Some("SOL".to_string()),
                    ..FeedSection::new("search", SEARCH_KEY)
                },
            ],
            thresholds: Thresholds::default(),
            scoring: ScoringConfig::default(),
            governors,
            dedup: DedupSection::default(),
            estimator: EstimatorSection::default(),
            sources: SourcesSection::default(),
            notifier: NotifierSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

/// One polling loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSection {
    /// Feed name used in logs and alerts
    pub name: String,
    /// Source key (`top_traded` or `search`)
    pub source: String,
    /// Poll interval in minutes
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Maximum records requested per poll
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Free-text query for search feeds
    #[serde(default)]
    pub query: Option<String>,
}

fn default_interval_minutes() -> u64 {
    5
}

fn default_limit() -> usize {
    50
}

impl FeedSection {
    pub fn new(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            interval_minutes: default_interval_minutes(),
            limit: default_limit(),
            query: None,
        }
    }
}

/// Dedup store section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSection {
    /// Hours before a notified address becomes eligible again
    pub epoch_hours: u64,
    /// State file path (`~` is expanded)
    pub state_file: String,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            epoch_hours: DEFAULT_EPOCH_HOURS,
            state_file: default_path(Path::new(DEFAULT_DATA_DIR)).display().to_string(),
        }
    }
}

impl DedupSection {
    pub fn state_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.state_file).to_string())
    }
}

/// Bin range used to annotate alerts with a rent estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSection {
    pub enabled: bool,
    /// Pool bin step in basis points
    pub bin_step: u16,
    /// Lowest bin relative to the active bin
    pub min_bin_offset: i32,
    /// Highest bin relative to the active bin
    pub max_bin_offset: i32,
}

impl Default for EstimatorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            bin_step: DEFAULT_BIN_STEP,
            min_bin_offset: -34,
            max_bin_offset: 34,
        }
    }
}

/// Upstream endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesSection {
    /// API key shared by sources that need one
    pub api_key: Option<String>,
    pub top_traded: HttpSourceConfig,
    pub search: HttpSourceConfig,
}

impl Default for SourcesSection {
    fn default() -> Self {
        Self {
            api_key: None,
            top_traded: default_top_traded_config(),
            search: default_search_config(),
        }
    }
}

impl SourcesSection {
    /// Connection settings for the top-traded source with the shared key applied
    pub fn top_traded_config(&self) -> HttpSourceConfig {
        let key = self.top_traded.api_key.clone().or_else(|| self.api_key.clone());
        self.top_traded.clone().with_api_key(key)
    }

    pub fn search_config(&self) -> HttpSourceConfig {
        self.search.clone()
    }
}

/// Alert delivery section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierSection {
    /// Webhook URL; alerts are only logged when unset
    pub webhook_url: Option<String>,
    /// Log alerts instead of delivering them
    pub dry_run: bool,
}

/// Logging configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Load configuration from a TOML file with process environment overrides
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Load configuration resolving overrides through `lookup`
pub fn load_config_with<P, F>(path: P, lookup: F) -> Result<Config, ConfigError>
where
    P: AsRef<Path>,
    F: Fn(&str) -> Option<String>,
{
    let content = std::fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&content)?;
    config.apply_env_overrides(lookup)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Apply `SCOUT_*` overrides
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(minutes) = parse_env::<u64, _>(&lookup, "SCOUT_POLL_INTERVAL_MINUTES")? {
            for feed in &mut self.feeds {
                feed.interval_minutes = minutes;
            }
        }

        if let Some(value) = parse_threshold(&lookup, "SCOUT_MIN_MARKET_CAP")? {
            self.thresholds.min_market_cap = value;
        }
        if let Some(value) = parse_threshold(&lookup, "SCOUT_MAX_MARKET_CAP")? {
            self.thresholds.max_market_cap = value;
        }
        if let Some(value) = parse_threshold(&lookup, "SCOUT_MIN_FEE")? {
            self.thresholds.min_fee_native = value;
        }
        if let Some(value) = parse_threshold(&lookup, "SCOUT_MIN_PRICE_CHANGE_1H")? {
            self.thresholds.min_price_change_1h = value;
        }

        if let Some(secs) = parse_env::<u64, _>(&lookup, "SCOUT_BREAKER_COOLDOWN_SECS")? {
            for governor in self.governors.values_mut() {
                governor.breaker_cooldown_secs = secs;
            }
        }
        for (source, governor) in self.governors.iter_mut() {
            let prefix = format!("SCOUT_{}", source.to_uppercase());
            if let Some(v) = parse_env::<u64, _>(&lookup, &format!("{}_WINDOW_SECS", prefix))? {
                governor.window_secs = v;
            }
            if let Some(v) = parse_env::<usize, _>(&lookup, &format!("{}_MAX_REQUESTS", prefix))? {
                governor.max_requests = v;
            }
            if let Some(v) = parse_env::<u64, _>(&lookup, &format!("{}_MIN_DELAY_MS", prefix))? {
                governor.min_delay_ms = v;
            }
            if let Some(v) = parse_env::<u64, _>(&lookup, &format!("{}_MAX_DELAY_MS", prefix))? {
                governor.max_delay_ms = v;
            }
        }

        if let Some(hours) = parse_env::<u64, _>(&lookup, "SCOUT_DEDUP_EPOCH_HOURS")? {
            self.dedup.epoch_hours = hours;
        }
        if let Some(path) = non_empty(&lookup, "SCOUT_STATE_FILE") {
            self.dedup.state_file = path;
        }
        if let Some(url) = non_empty(&lookup, "SCOUT_WEBHOOK_URL") {
            self.notifier.webhook_url = Some(url);
        }
        if let Some(key) = non_empty(&lookup, "SCOUT_API_KEY") {
            self.sources.api_key = Some(key);
        }
        if let Some(price) = parse_env::<f64, _>(&lookup, "SCOUT_QUOTE_PER_NATIVE")? {
            self.scoring.quote_per_native = Some(price);
        }

        Ok(())
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(invalid("at least one [[feeds]] entry is required"));
        }

        let mut names = std::collections::HashSet::new();
        for feed in &self.feeds {
            if feed.name.trim().is_empty() {
                return Err(invalid("feed name cannot be empty"));
            }
            if !names.insert(feed.name.as_str()) {
                return Err(invalid(format!("duplicate feed name '{}'", feed.name)));
            }
            if feed.source != TOP_TRADED_KEY && feed.source != SEARCH_KEY {
                return Err(invalid(format!(
                    "feed '{}' has unknown source '{}'",
                    feed.name, feed.source
                )));
            }
            if feed.interval_minutes == 0 {
                return Err(invalid(format!(
                    "feed '{}' interval_minutes must be > 0",
                    feed.name
                )));
            }
            if feed.limit == 0 {
                return Err(invalid(format!("feed '{}' limit must be > 0", feed.name)));
            }
        }

        for (source, governor) in &self.governors {
            governor
                .validate()
                .map_err(|e| invalid(format!("governor '{}': {}", source, e)))?;
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("min_market_cap", t.min_market_cap),
            ("max_market_cap", t.max_market_cap),
            ("min_fee_native", t.min_fee_native),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(invalid(format!("{} must be >= 0, got {}", name, v)));
                }
            }
        }
        if let Some(change) = t.min_price_change_1h {
            if !change.is_finite() {
                return Err(invalid(format!("min_price_change_1h must be finite, got {}", change)));
            }
        }
        if let (Some(min), Some(max)) = (t.min_market_cap, t.max_market_cap) {
            if min > max {
                return Err(invalid(format!(
                    "min_market_cap ({}) must be <= max_market_cap ({})",
                    min, max
                )));
            }
        }
        if !(t.freshness_window_hours >= 0.0) {
            return Err(invalid("freshness_window_hours must be >= 0"));
        }
        if !(t.stale_fee_multiplier >= 1.0) {
            return Err(invalid("stale_fee_multiplier must be >= 1"));
        }

        if !(self.scoring.cap_unit > 0.0) || !(self.scoring.fee_unit > 0.0) {
            return Err(invalid("scoring units must be > 0"));
        }
        if let Some(price) = self.scoring.quote_per_native {
            if !(price > 0.0) || !price.is_finite() {
                return Err(invalid(format!("quote_per_native must be > 0, got {}", price)));
            }
        }

        if self.dedup.epoch_hours == 0 {
            return Err(invalid("dedup epoch_hours must be > 0"));
        }
        if self.dedup.state_file.trim().is_empty() {
            return Err(invalid("dedup state_file cannot be empty"));
        }

        if self.estimator.bin_step == 0 {
            return Err(invalid("estimator bin_step must be > 0"));
        }
        if self.estimator.min_bin_offset > self.estimator.max_bin_offset {
            return Err(invalid("estimator min_bin_offset must be <= max_bin_offset"));
        }

        for (name, source) in [("top_traded", &self.sources.top_traded), ("search", &self.sources.search)] {
            if source.url.is_empty() {
                return Err(invalid(format!("sources.{}.url cannot be empty", name)));
            }
            if source.timeout_secs == 0 {
                return Err(invalid(format!("sources.{}.timeout_secs must be > 0", name)));
            }
        }

        if let Some(url) = &self.notifier.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid("notifier webhook_url must be an http(s) URL"));
            }
        }

        Ok(())
    }

    /// Limiter settings for `source`, falling back to defaults
    pub fn governor_for(&self, source: &str) -> GovernorConfig {
        self.governors.get(source).cloned().unwrap_or_default()
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn non_empty<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(format!("{} is not a valid number: '{}'", key, raw))),
    }
}

/// `Some(None)` when the threshold is switched off
fn parse_threshold<F>(lookup: &F, key: &str) -> Result<Option<Option<f64>>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key) {
        Some(raw) if raw.eq_ignore_ascii_case(DISABLED) => Ok(Some(None)),
        _ => Ok(parse_env::<f64, _>(lookup, key)?.map(Some)),
    }
}
