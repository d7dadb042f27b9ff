//! Poll Pipeline
//!
//! One cycle: purge expired dedup records, fetch every feed through its
//! source's rate governor, validate and score candidates, merge duplicates by
//! address, drop already-notified addresses and deliver at most one alert.
//!
//! Nothing in a cycle propagates an error to the caller. Every failure is
//! logged and recorded in [`CycleReport::skipped`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::fee_estimator::{self, EstimateRequest};
use crate::domain::{
    evaluate, score, short_address, Candidate, FeeEstimate, GovernorRegistry, NotificationStore,
    RawSnapshot, ScoringConfig, Thresholds,
};
use crate::ports::{Alert, CandidateSource, FilterParams, Notifier, SourceError};

/// A named polling target bound to one source
#[derive(Clone)]
pub struct Feed {
    pub name: String,
    pub source: Arc<dyn CandidateSource>,
    pub params: FilterParams,
    pub interval: Duration,
}

impl Feed {
    pub fn new(name: impl Into<String>, source: Arc<dyn CandidateSource>, params: FilterParams) -> Self {
        Self {
            name: name.into(),
            source,
            params,
            interval: Duration::from_secs(5 * 60),
        }
    }

    /// Builder method setting the poll interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn source_key(&self) -> &str {
        self.source.key()
    }
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("name", &self.name)
            .field("source", &self.source.key())
            .field("params", &self.params)
            .field("interval", &self.interval)
            .finish()
    }
}

/// Bin range used for the alert's rent estimate
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorSettings {
    pub bin_step: u16,
    pub min_bin_id: i32,
    pub max_bin_id: i32,
}

impl EstimatorSettings {
    pub fn request(&self) -> EstimateRequest {
        EstimateRequest::new_position(self.min_bin_id, self.max_bin_id, self.bin_step)
    }
}

/// Pipeline settings
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub thresholds: Thresholds,
    pub scoring: ScoringConfig,
    /// `None` sends alerts without a rent estimate
    pub estimator: Option<EstimatorSettings>,
}

/// Why part of a cycle was skipped
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Skip {
    /// Source throttled us; its breaker was tripped
    RateLimited { feed: String, source: String, cooldown_secs: u64 },
    /// Fetch failed; the feed retries next tick
    SourceUnavailable { feed: String, reason: String },
    /// Record dropped during validation
    MalformedRecord { feed: String, reason: String },
    /// Another feed holds the delivery claim for this address
    ClaimedElsewhere { address: String },
    /// Rent estimate could not be computed; alert sent without it
    EstimateFailed { address: String, reason: String },
    /// Notifier reported failure; the address stays eligible
    DeliveryFailed { address: String, reason: String },
    /// Dedup state could not be written
    PersistFailed { reason: String },
}

/// Summary of the delivered alert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delivered {
    pub feed: String,
    pub address: String,
    pub symbol: String,
    pub score: f64,
}

/// Outcome of one cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    pub feeds: Vec<String>,
    /// Records fetched across all feeds
    pub fetched: usize,
    /// Valid candidates after merging by address
    pub candidates: usize,
    pub qualified: usize,
    /// Qualified candidates suppressed by the dedup store
    pub already_notified: usize,
    /// Dedup records purged at cycle start
    pub purged: usize,
    pub delivered: Option<Delivered>,
    pub skipped: Vec<Skip>,
}

impl CycleReport {
    pub fn summary(&self) -> String {
        let delivered = match &self.delivered {
            Some(d) => format!("{} ({}) score {:.2}", d.symbol, short_address(&d.address), d.score),
            None => "none".to_string(),
        };
        format!(
            "feeds=[{}] fetched={} candidates={} qualified={} deduped={} delivered={} skipped={}",
            self.feeds.join(","),
            self.fetched,
            self.candidates,
            self.qualified,
            self.already_notified,
            delivered,
            self.skipped.len()
        )
    }
}

/// A candidate with its score and the feed that reported it
#[derive(Debug, Clone)]
struct Scored {
    feed: String,
    candidate: Candidate,
    score: f64,
    fee_native: Option<f64>,
    qualifies: bool,
}

/// The governor → adapter → filter → dedup → notify chain
pub struct Pipeline {
    registry: Arc<GovernorRegistry>,
    store: Arc<NotificationStore>,
    notifier: Arc<dyn Notifier>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        registry: Arc<GovernorRegistry>,
        store: Arc<NotificationStore>,
        notifier: Arc<dyn Notifier>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<GovernorRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one cycle over `feeds` at the current time
    pub async fn run_cycle(&self, feeds: &[Arc<Feed>]) -> CycleReport {
        self.run_cycle_at(feeds, Utc::now()).await
    }

    /// Run one cycle over `feeds` treating `now` as the cycle time
    pub async fn run_cycle_at(&self, feeds: &[Arc<Feed>], now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport {
            started_at: Some(now),
            feeds: feeds.iter().map(|f| f.name.clone()).collect(),
            ..Default::default()
        };

        match self.store.cleanup(now).await {
            Ok(purged) => report.purged = purged,
            Err(e) => {
                tracing::warn!(error = %e, "Dedup cleanup could not be persisted");
                report.skipped.push(Skip::PersistFailed { reason: e.to_string() });
            }
        }

        let mut merged: HashMap<String, Scored> = HashMap::new();
        for feed in feeds {
            let snapshots = match self.fetch(feed).await {
                Ok(snapshots) => snapshots,
                Err(skip) => {
                    report.skipped.push(skip);
                    continue;
                }
            };
            report.fetched += snapshots.len();

            for snapshot in snapshots {
                match self.score_snapshot(feed, snapshot, now) {
                    Ok(scored) => merge(&mut merged, scored),
                    Err(skip) => report.skipped.push(skip),
                }
            }
        }
        report.candidates = merged.len();

        let mut eligible = Vec::new();
        for scored in merged.into_values().filter(|s| s.qualifies) {
            report.qualified += 1;
            if self.store.should_notify(&scored.candidate.address, now).await {
                eligible.push(scored);
            } else {
                report.already_notified += 1;
            }
        }
        eligible.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.candidate.address.cmp(&b.candidate.address))
        });

        for scored in eligible {
            if !self.store.reserve(&scored.candidate.address, now).await {
                tracing::debug!(
                    address = %scored.candidate.address,
                    "Address claimed by another feed, trying next candidate"
                );
                report.skipped.push(Skip::ClaimedElsewhere {
                    address: scored.candidate.address.clone(),
                });
                continue;
            }
            report.delivered = self.deliver(scored, now, &mut report.skipped).await;
            break;
        }

        tracing::info!("Cycle complete: {}", report.summary());
        report
    }

    /// Governed fetch; a throttle response trips the source's breaker
    async fn fetch(&self, feed: &Feed) -> Result<Vec<RawSnapshot>, Skip> {
        let key = feed.source_key();
        let waited = self.registry.admit(key).await;
        tracing::debug!(feed = %feed.name, source = key, waited_ms = waited.as_millis() as u64, "Admitted");

        match feed.source.fetch(&feed.params).await {
            Ok(snapshots) => {
                self.registry.record_success(key);
                Ok(snapshots)
            }
            Err(SourceError::RateLimited { retry_after, .. }) => {
                let base = self.registry.governor(key).config().breaker_cooldown();
                let cooldown = retry_after.map_or(base, |hint| hint.max(base));
                self.registry.trip_breaker(key, cooldown);
                tracing::warn!(
                    feed = %feed.name,
                    source = key,
                    cooldown_secs = cooldown.as_secs(),
                    "Source rate limited, breaker tripped"
                );
                Err(Skip::RateLimited {
                    feed: feed.name.clone(),
                    source: key.to_string(),
                    cooldown_secs: cooldown.as_secs(),
                })
            }
            Err(e @ SourceError::SourceUnavailable { .. }) => {
                tracing::warn!(feed = %feed.name, error = %e, "Feed fetch failed, skipping until next tick");
                Err(Skip::SourceUnavailable {
                    feed: feed.name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn score_snapshot(&self, feed: &Feed, snapshot: RawSnapshot, now: DateTime<Utc>) -> Result<Scored, Skip> {
        let candidate = Candidate::from_snapshot(snapshot, feed.source_key(), now).map_err(|e| {
            tracing::warn!(feed = %feed.name, error = %e, "Dropping malformed record");
            Skip::MalformedRecord {
                feed: feed.name.clone(),
                reason: e.to_string(),
            }
        })?;

        let evaluation = evaluate(&candidate, &self.config.thresholds, &self.config.scoring, now);
        if !evaluation.qualifies {
            let reasons: Vec<String> = evaluation.reasons.iter().map(ToString::to_string).collect();
            tracing::debug!(
                feed = %feed.name,
                symbol = %candidate.symbol,
                reasons = %reasons.join("; "),
                "Candidate rejected"
            );
        }
        let score = score(&candidate, evaluation.fee_native, &self.config.scoring);

        Ok(Scored {
            feed: feed.name.clone(),
            candidate,
            score,
            fee_native: evaluation.fee_native,
            qualifies: evaluation.qualifies,
        })
    }

    /// Deliver a reserved candidate; marks on success, releases on failure
    async fn deliver(&self, scored: Scored, now: DateTime<Utc>, skipped: &mut Vec<Skip>) -> Option<Delivered> {
        let address = scored.candidate.address.clone();
        let fee_estimate = self.estimate(&address, skipped);

        let alert = Alert {
            feed: scored.feed.clone(),
            candidate: scored.candidate,
            score: scored.score,
            fee_native: scored.fee_native,
            fee_estimate,
        };

        if let Err(e) = self.notifier.notify(&alert).await {
            tracing::warn!(address = %address, notifier = self.notifier.name(), error = %e, "Delivery failed, address stays eligible");
            self.store.release(&address).await;
            skipped.push(Skip::DeliveryFailed {
                address,
                reason: e.to_string(),
            });
            return None;
        }

        if let Err(e) = self.store.mark_notified(&address, now).await {
            tracing::error!(address = %address, error = %e, "Notification delivered but dedup state not persisted");
            skipped.push(Skip::PersistFailed { reason: e.to_string() });
        }

        tracing::info!(
            feed = %alert.feed,
            address = %address,
            symbol = %alert.candidate.symbol,
            score = alert.score,
            "Notification sent"
        );

        Some(Delivered {
            feed: alert.feed,
            address,
            symbol: alert.candidate.symbol,
            score: alert.score,
        })
    }

    fn estimate(&self, address: &str, skipped: &mut Vec<Skip>) -> Option<FeeEstimate> {
        let settings = self.config.estimator.as_ref()?;
        match fee_estimator::estimate(&settings.request()) {
            Ok(estimate) => Some(estimate),
            Err(e) => {
                tracing::warn!(address, error = %e, "Rent estimate failed");
                skipped.push(Skip::EstimateFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                });
                None
            }
        }
    }
}

/// Keep the best observation of each address: a qualifying one beats a
/// failing one, then the higher score wins; ties keep the first
fn merge(merged: &mut HashMap<String, Scored>, scored: Scored) {
    let replace = match merged.get(&scored.candidate.address) {
        Some(existing) => match scored.qualifies.cmp(&existing.qualifies) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => scored.score > existing.score,
        },
        None => true,
    };
    if replace {
        merged.insert(scored.candidate.address.clone(), scored);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GovernorConfig;
    use crate::ports::{MockNotifier, MockSource};

    const BONK: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";
    const JUP: &str = "JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN";

    fn fast_governor() -> GovernorConfig {
        GovernorConfig {
            min_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
            ..GovernorConfig::default()
        }
    }

    fn snapshot(address: &str, market_cap: f64, fee: f64) -> RawSnapshot {
        RawSnapshot {
            address: Some(address.to_string()),
            symbol: Some("TKN".to_string()),
            market_cap: Some(market_cap),
            fee_native: Some(fee),
            price_change_1h: Some(30.0),
            ..Default::default()
        }
    }

    fn pipeline(notifier: MockNotifier) -> Pipeline {
        let registry = Arc::new(GovernorRegistry::new(fast_governor()));
        let store = Arc::new(NotificationStore::in_memory(24));
        let config = PipelineConfig {
            estimator: Some(EstimatorSettings { bin_step: 100, min_bin_id: -34, max_bin_id: 34 }),
            ..Default::default()
        };
        Pipeline::new(registry, store, Arc::new(notifier), config)
    }

    fn feed(name: &str, source: MockSource) -> Arc<Feed> {
        Arc::new(Feed::new(name, Arc::new(source), FilterParams { limit: 10, ..Default::default() }))
    }

    #[tokio::test]
    async fn test_best_candidate_notified() {
        let notifier = MockNotifier::new();
        let pipeline = pipeline(notifier.clone());
        let source = MockSource::new("a").with_snapshots(vec![
            snapshot(BONK, 1_000_000.0, 25.0),
            snapshot(JUP, 5_000_000.0, 40.0),
        ]);

        let report = pipeline.run_cycle(&[feed("top", source)]).await;

        assert_eq!(report.qualified, 2);
        assert_eq!(notifier.delivered_addresses(), vec![JUP.to_string()]);
        let alert = &notifier.get_alerts()[0];
        assert!(alert.fee_estimate.as_ref().unwrap().approximate);
        assert_eq!(report.delivered.unwrap().address, JUP);
    }

    #[tokio::test]
    async fn test_malformed_record_skipped() {
        let notifier = MockNotifier::new();
        let pipeline = pipeline(notifier.clone());
        let source = MockSource::new("a").with_snapshots(vec![
            snapshot("not-an-address", 1_000_000.0, 25.0),
            snapshot(BONK, 1_000_000.0, 25.0),
        ]);

        let report = pipeline.run_cycle(&[feed("top", source)]).await;

        assert_eq!(report.fetched, 2);
        assert_eq!(report.candidates, 1);
        assert!(matches!(report.skipped.as_slice(), [Skip::MalformedRecord { .. }]));
        assert_eq!(notifier.delivered_addresses(), vec![BONK.to_string()]);
    }

    #[tokio::test]
    async fn test_rate_limited_trips_breaker() {
        let pipeline = pipeline(MockNotifier::new());
        let source = MockSource::new("a");
        source.push_response(Err(SourceError::RateLimited {
            source_name: "a".to_string(),
            retry_after: Some(Duration::from_secs(900)),
        }));

        let report = pipeline.run_cycle(&[feed("top", source)]).await;

        assert_eq!(
            report.skipped,
            vec![Skip::RateLimited {
                feed: "top".to_string(),
                source: "a".to_string(),
                cooldown_secs: 900,
            }]
        );
        let status = pipeline.registry().governor("a").status();
        assert!(!status.breaker.status.allows_calls());
        assert!(report.delivered.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_source_does_not_block_other_feeds() {
        let notifier = MockNotifier::new();
        let pipeline = pipeline(notifier.clone());
        let broken = MockSource::new("a");
        broken.push_response(Err(SourceError::unavailable("a", "HTTP 503")));
        let healthy = MockSource::new("b").with_snapshots(vec![snapshot(BONK, 1_000_000.0, 25.0)]);

        let report = pipeline
            .run_cycle(&[feed("broken", broken), feed("healthy", healthy)])
            .await;

        assert!(matches!(report.skipped.as_slice(), [Skip::SourceUnavailable { .. }]));
        assert_eq!(notifier.delivered_addresses(), vec![BONK.to_string()]);
    }

    #[tokio::test]
    async fn test_no_qualifying_candidates() {
        let notifier = MockNotifier::new();
        let pipeline = pipeline(notifier.clone());
        let source = MockSource::new("a").with_snapshots(vec![snapshot(BONK, 1_000.0, 25.0)]);

        let report = pipeline.run_cycle(&[feed("top", source)]).await;

        assert_eq!(report.candidates, 1);
        assert_eq!(report.qualified, 0);
        assert!(notifier.get_alerts().is_empty());
        assert!(pipeline.store().is_empty().await);
    }

    #[test]
    fn test_merge_keeps_higher_score() {
        let now = Utc::now();
        let make = |feed: &str, score: f64| Scored {
            feed: feed.to_string(),
            candidate: Candidate::from_snapshot(snapshot(BONK, 1.0, 1.0), "a", now).unwrap(),
            score,
            fee_native: None,
            qualifies: true,
        };
        let mut merged = HashMap::new();
        merge(&mut merged, make("low", 1.0));
        merge(&mut merged, make("high", 2.0));
        merge(&mut merged, make("tie", 2.0));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[BONK].feed, "high");
    }

    #[test]
    fn test_merge_prefers_qualifying_observation() {
        let now = Utc::now();
        let make = |feed: &str, score: f64, qualifies: bool| Scored {
            feed: feed.to_string(),
            candidate: Candidate::from_snapshot(snapshot(BONK, 1.0, 1.0), "a", now).unwrap(),
            score,
            fee_native: None,
            qualifies,
        };
        let mut merged = HashMap::new();
        merge(&mut merged, make("passing", 1.0, true));
        merge(&mut merged, make("failing", 9.0, false));
        assert_eq!(merged[BONK].feed, "passing");

        let mut merged = HashMap::new();
        merge(&mut merged, make("failing", 9.0, false));
        merge(&mut merged, make("passing", 1.0, true));
        assert_eq!(merged[BONK].feed, "passing");
    }
}
