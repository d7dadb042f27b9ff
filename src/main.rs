//! dlmm-scout - Rate-governed token feed scanner
//!
//! Polls market-data feeds, qualifies tokens and sends deduplicated alerts
//! annotated with a DLMM liquidity cost estimate.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use dlmm_scout::adapters::cli::{CheckCmd, CliApp, Command, EstimateCmd, RunCmd, StatusCmd};
use dlmm_scout::adapters::market_data::{SearchSource, TopTradedSource, SEARCH_KEY, TOP_TRADED_KEY};
use dlmm_scout::adapters::notifier::{LogNotifier, WebhookNotifier};
use dlmm_scout::application::{EstimatorSettings, Feed, Pipeline, PipelineConfig, Scheduler};
use dlmm_scout::config::{load_config, Config};
use dlmm_scout::domain::fee_estimator::{self, EstimateRequest};
use dlmm_scout::domain::{
    short_address, GovernorConfig, GovernorRegistry, NotificationStore, RecoveryStatus,
};
use dlmm_scout::ports::{CandidateSource, FilterParams, Notifier};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (API keys and webhook URLs go here)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();

    let config = match config_path(&app.command) {
        Some(path) => Some(
            load_config(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display())),
        ),
        None => None,
    };
    let config_level = config
        .as_ref()
        .and_then(|c| c.as_ref().ok())
        .map(|c| c.logging.level.clone());
    init_logging(app.verbose, app.debug, config_level.as_deref())?;

    match app.command {
        Command::Run(cmd) => run_command(cmd, required(config)?).await,
        Command::Once(cmd) => once_command(cmd, required(config)?).await,
        Command::Estimate(cmd) => estimate_command(cmd),
        Command::Status(cmd) => status_command(cmd, required(config)?).await,
        Command::Check(cmd) => check_command(cmd, required(config)?),
    }
}

fn required(config: Option<Result<Config>>) -> Result<Config> {
    config.context("configuration required")?
}

fn config_path(command: &Command) -> Option<&Path> {
    match command {
        Command::Run(cmd) | Command::Once(cmd) => Some(cmd.config.as_path()),
        Command::Status(cmd) => Some(cmd.config.as_path()),
        Command::Check(cmd) => Some(cmd.config.as_path()),
        Command::Estimate(_) => None,
    }
}

/// Flags win over the config level; `RUST_LOG` wins over both
fn init_logging(verbose: bool, debug: bool, config_level: Option<&str>) -> Result<()> {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        config_level.unwrap_or("warn")
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt().with_env_filter(filter).with_target(false).init();
    Ok(())
}

/// Wire governors, store, notifier and feeds from the configuration
fn build_scheduler(config: &Config, dry_run: bool) -> Result<Scheduler> {
    let registry = Arc::new(GovernorRegistry::new(GovernorConfig::default()));
    for (source, governor) in &config.governors {
        registry.register(source, governor.clone());
    }

    let (store, recovery) = NotificationStore::open(config.dedup.state_path(), config.dedup.epoch_hours);
    match recovery {
        RecoveryStatus::NoState => tracing::info!("No notification state found, starting fresh"),
        RecoveryStatus::Recovered(count) => tracing::info!(count, "Resumed notification state"),
        RecoveryStatus::Corrupted(reason) => {
            tracing::error!(reason = %reason, "Notification state was corrupt and has been reset")
        }
    }

    let notifier: Arc<dyn Notifier> = match (&config.notifier.webhook_url, dry_run || config.notifier.dry_run) {
        (Some(url), false) => Arc::new(WebhookNotifier::new(url.clone()).context("Invalid webhook")?),
        (None, false) => {
            tracing::warn!("No webhook configured, alerts will only be logged");
            Arc::new(LogNotifier::new())
        }
        (_, true) => {
            tracing::warn!("DRY RUN mode - alerts will only be logged");
            Arc::new(LogNotifier::new())
        }
    };

    let mut sources: HashMap<&str, Arc<dyn CandidateSource>> = HashMap::new();
    let mut feeds = Vec::new();
    for section in &config.feeds {
        let source = match sources.get(section.source.as_str()) {
            Some(source) => Arc::clone(source),
            None => {
                let source: Arc<dyn CandidateSource> = match section.source.as_str() {
                    TOP_TRADED_KEY => Arc::new(TopTradedSource::new(config.sources.top_traded_config())?),
                    SEARCH_KEY => Arc::new(SearchSource::new(config.sources.search_config())?),
                    other => anyhow::bail!("Unknown source '{}'", other),
                };
                sources.insert(section.source.as_str(), Arc::clone(&source));
                source
            }
        };

        let params = FilterParams {
            min_market_cap: config.thresholds.min_market_cap,
            max_market_cap: config.thresholds.max_market_cap,
            limit: section.limit,
            query: section.query.clone(),
        };
        feeds.push(
            Feed::new(section.name.clone(), source, params)
                .with_interval(Duration::from_secs(section.interval_minutes * 60)),
        );
    }

    let estimator = config.estimator.enabled.then(|| EstimatorSettings {
        bin_step: config.estimator.bin_step,
        min_bin_id: config.estimator.min_bin_offset,
        max_bin_id: config.estimator.max_bin_offset,
    });
    let pipeline = Pipeline::new(
        registry,
        Arc::new(store),
        notifier,
        PipelineConfig {
            thresholds: config.thresholds.clone(),
            scoring: config.scoring.clone(),
            estimator,
        },
    );

    Ok(Scheduler::new(Arc::new(pipeline), feeds))
}

async fn run_command(cmd: RunCmd, config: Config) -> Result<()> {
    tracing::info!("Starting dlmm-scout...");
    tracing::info!("Config: {}", cmd.config.display());

    let scheduler = build_scheduler(&config, cmd.dry_run)?;

    // Setup Ctrl+C handler
    let shutdown = scheduler.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received");
        shutdown.shutdown();
    });

    scheduler.run().await;
    tracing::info!("dlmm-scout stopped");
    Ok(())
}

async fn once_command(cmd: RunCmd, config: Config) -> Result<()> {
    let scheduler = build_scheduler(&config, cmd.dry_run)?;
    let report = scheduler.run_all_once().await;

    println!("Cycle: {}", report.summary());
    if let Some(delivered) = &report.delivered {
        println!(
            "  Notified: {} ({}) via feed '{}' score {:.2}",
            delivered.symbol, delivered.address, delivered.feed, delivered.score
        );
    }
    for skip in &report.skipped {
        println!("  Skipped: {:?}", skip);
    }
    for status in scheduler.pipeline().registry().statuses() {
        println!(
            "  Governor {}: {}/{} calls in window, breaker {}",
            status.source,
            status.calls_in_window,
            status.max_requests,
            status.breaker.status.description()
        );
    }
    Ok(())
}

fn estimate_command(cmd: EstimateCmd) -> Result<()> {
    let mut request = EstimateRequest::new_position(cmd.min_bin, cmd.max_bin, cmd.bin_step);
    if let Some(position) = cmd.position {
        request = request.with_position(position);
    }
    if let Some(regions) = cmd.regions {
        request = request.with_known_regions(regions);
    }

    let estimate = fee_estimator::estimate(&request).context("Invalid estimate request")?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&estimate)?);
        return Ok(());
    }

    let (low, high) = fee_estimator::price_range(cmd.min_bin, cmd.max_bin, cmd.bin_step);
    println!("Bins {}..={} (step {} bps)", cmd.min_bin, cmd.max_bin, cmd.bin_step);
    println!("  Bin count:        {}", estimate.bin_count);
    println!("  Price range:      {:.6}x .. {:.6}x of bin 0", low, high);
    println!("  Regions spanned:  {}", estimate.regions_spanned);
    println!("  New regions:      {}", estimate.new_bins_region_count);
    println!("  Extensions:       {}", estimate.extensions_needed);
    println!("  Position rent:    {:.9} SOL", fee_estimator::lamports_to_sol(estimate.position_rent));
    println!("  Extension rent:   {:.9} SOL", fee_estimator::lamports_to_sol(estimate.extension_rent));
    println!("  Bin array rent:   {:.9} SOL", fee_estimator::lamports_to_sol(estimate.binarray_rent));
    println!("  Refundable:       {:.9} SOL", fee_estimator::lamports_to_sol(estimate.refundable_total));
    println!("  Non-refundable:   {:.9} SOL", fee_estimator::lamports_to_sol(estimate.non_refundable_total));
    println!("  Total:            {:.9} SOL", estimate.total_sol());
    if estimate.approximate {
        println!("  (approximate: region membership unknown, pass --regions for an exact figure)");
    }
    Ok(())
}

async fn status_command(cmd: StatusCmd, config: Config) -> Result<()> {
    let path = config.dedup.state_path();
    let (store, recovery) = NotificationStore::open(&path, config.dedup.epoch_hours);
    let records = store.records().await;
    let now = Utc::now();

    if cmd.format == "json" {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("State file: {} ({:?})", path.display(), recovery);
    println!("Epoch: {}h, {} record(s)", config.dedup.epoch_hours, records.len());
    for (address, notified_at) in &records {
        let age = now - *notified_at;
        let expired = age >= store.epoch();
        println!(
            "  {}  {}  {:>5.1}h ago{}",
            short_address(address),
            notified_at.to_rfc3339(),
            age.num_minutes() as f64 / 60.0,
            if expired { "  (expired, purged next cycle)" } else { "" }
        );
    }
    Ok(())
}

fn check_command(cmd: CheckCmd, config: Config) -> Result<()> {
    println!("✓ Configuration valid: {}", cmd.config.display());
    for feed in &config.feeds {
        println!(
            "  Feed '{}': source={} every {}m limit={}{}",
            feed.name,
            feed.source,
            feed.interval_minutes,
            feed.limit,
            feed.query.as_ref().map(|q| format!(" query='{}'", q)).unwrap_or_default()
        );
    }
    for (source, governor) in &config.governors {
        println!(
            "  Governor '{}': {} req/{}s, delay {}-{}ms (+{}ms jitter), breaker {}s",
            source,
            governor.max_requests,
            governor.window_secs,
            governor.min_delay_ms,
            governor.max_delay_ms,
            governor.jitter_ms,
            governor.breaker_cooldown_secs
        );
    }
    println!(
        "  Dedup: {}h epoch, state file {}",
        config.dedup.epoch_hours,
        config.dedup.state_path().display()
    );
    println!(
        "  Notifier: {}",
        match (&config.notifier.webhook_url, config.notifier.dry_run) {
            (Some(_), false) => "webhook",
            _ => "log (dry run)",
        }
    );
    if config.scoring.quote_per_native.is_none() {
        println!("  Note: quote_per_native unset, tokens without a native fee figure cannot qualify on fees");
    }
    Ok(())
}
