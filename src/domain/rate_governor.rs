//! Rate Governor
//!
//! Sliding-window token bucket plus throttle circuit breaker guarding the
//! outbound calls to one upstream source. Admission never fails; it only
//! suspends the caller.
//!
//! Each source gets its own governor so a throttled feed never stalls an
//! unrelated one. Feeds that poll the same source share a governor through
//! [`GovernorRegistry`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerState, DEFAULT_BREAKER_COOLDOWN_SECS};

/// Safety margin added when waiting for the oldest window entry to expire
const WINDOW_EXIT_MARGIN: Duration = Duration::from_millis(1);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GovernorConfigError {
    #[error("max_requests must be > 0")]
    ZeroCapacity,
    #[error("window_secs must be > 0")]
    ZeroWindow,
    #[error("min_delay_ms ({min}) must be <= max_delay_ms ({max})")]
    InvertedDelay { min: u64, max: u64 },
}

/// Per-source limiter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Length of the sliding window in seconds
    pub window_secs: u64,
    /// Maximum admitted calls inside one window
    pub max_requests: usize,
    /// Lower bound of the randomized inter-request delay
    pub min_delay_ms: u64,
    /// Upper bound of the randomized inter-request delay
    pub max_delay_ms: u64,
    /// Extra jitter drawn from `[0, jitter_ms]`
    pub jitter_ms: u64,
    /// Breaker cooldown applied when the source throttles us
    pub breaker_cooldown_secs: u64,
}

impl Default for GovernorConfig {
    /// 8 requests per minute with an 8-12s spacing, the bulk token feed profile
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 8,
            min_delay_ms: 8_000,
            max_delay_ms: 12_000,
            jitter_ms: 500,
            breaker_cooldown_secs: DEFAULT_BREAKER_COOLDOWN_SECS,
        }
    }
}

impl GovernorConfig {
    /// Flat minimum spacing with no jitter, the search feed profile
    pub fn flat(delay_ms: u64) -> Self {
        Self {
            window_secs: 60,
            max_requests: 20,
            min_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            jitter_ms: 0,
            breaker_cooldown_secs: DEFAULT_BREAKER_COOLDOWN_SECS,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    pub fn validate(&self) -> Result<(), GovernorConfigError> {
        if self.max_requests == 0 {
            return Err(GovernorConfigError::ZeroCapacity);
        }
        if self.window_secs == 0 {
            return Err(GovernorConfigError::ZeroWindow);
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(GovernorConfigError::InvertedDelay {
                min: self.min_delay_ms,
                max: self.max_delay_ms,
            });
        }
        Ok(())
    }

    /// Draw one inter-request delay
    fn draw_delay(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let base = rng.gen_range(self.min_delay_ms..=self.max_delay_ms);
        let jitter = if self.jitter_ms > 0 {
            rng.gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

/// Chronological record of admitted calls inside the sliding window
#[derive(Debug, Clone)]
pub struct RateWindow {
    entries: VecDeque<Instant>,
    window: Duration,
    capacity: usize,
}

impl RateWindow {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            window,
            capacity,
        }
    }

    /// Drop entries that have left the window
    pub fn prune(&mut self, now: Instant) {
        while self
            .entries
            .front()
            .map_or(false, |t| now.saturating_duration_since(*t) >= self.window)
        {
            self.entries.pop_front();
        }
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// When the window is full, the instant at which the oldest entry exits
    pub fn next_free_slot(&self) -> Option<Instant> {
        if !self.is_full() {
            return None;
        }
        self.entries
            .front()
            .map(|oldest| *oldest + self.window + WINDOW_EXIT_MARGIN)
    }

    pub fn push(&mut self, at: Instant) {
        self.entries.push_back(at);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Instant> {
        self.entries.iter()
    }
}

#[derive(Debug)]
struct GovernorState {
    window: RateWindow,
    breaker: CircuitBreaker,
    successes: u64,
    last_success: Option<Instant>,
}

/// Monitoring snapshot of one governor
#[derive(Debug, Clone, Serialize)]
pub struct GovernorStatus {
    pub source: String,
    pub calls_in_window: usize,
    pub max_requests: usize,
    pub breaker: CircuitBreakerState,
    pub successes: u64,
}

enum Suspension {
    Breaker(Instant),
    Capacity(Instant),
}

/// Rate governor for a single upstream source
#[derive(Debug)]
pub struct RateGovernor {
    source: String,
    config: GovernorConfig,
    /// Serializes whole admissions so concurrent callers cannot overfill the window
    admission: tokio::sync::Mutex<()>,
    /// Short critical sections only, never held across an await
    state: Mutex<GovernorState>,
}

impl RateGovernor {
    pub fn new(source: impl Into<String>, config: GovernorConfig) -> Self {
        let window = RateWindow::new(config.window(), config.max_requests);
        Self {
            source: source.into(),
            config,
            admission: tokio::sync::Mutex::new(()),
            state: Mutex::new(GovernorState {
                window,
                breaker: CircuitBreaker::new(),
                successes: 0,
                last_success: None,
            }),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, GovernorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until a call to this source may proceed, then record it.
    ///
    /// The breaker and window are re-checked after the spacing delay, so a
    /// trip recorded while this caller slept still suspends it.
    ///
    /// Returns the total time the caller was suspended.
    pub async fn admit(&self) -> Duration {
        let _turn = self.admission.lock().await;
        let started = Instant::now();
        let mut suspended = false;
        let mut spaced = false;

        loop {
            let now = Instant::now();
            let ready = suspended || spaced;
            let suspension = {
                let mut state = self.lock_state();
                state.window.prune(now);
                let suspension = match state.breaker.resets_at() {
                    Some(resets_at) if state.breaker.is_open_at(now) => {
                        Some(Suspension::Breaker(resets_at))
                    }
                    _ => {
                        state.breaker.try_close(now);
                        state.window.next_free_slot().map(Suspension::Capacity)
                    }
                };
                if suspension.is_none() && ready {
                    state.window.push(now);
                }
                suspension
            };

            match suspension {
                Some(Suspension::Breaker(until)) => {
                    tracing::warn!(
                        source = %self.source,
                        wait_secs = until.saturating_duration_since(now).as_secs(),
                        "Circuit breaker open, suspending until cooldown ends"
                    );
                    suspended = true;
                    tokio::time::sleep_until(until).await;
                }
                Some(Suspension::Capacity(until)) => {
                    tracing::debug!(
                        source = %self.source,
                        wait_ms = until.saturating_duration_since(now).as_millis() as u64,
                        "Rate window full, waiting for oldest call to expire"
                    );
                    suspended = true;
                    tokio::time::sleep_until(until).await;
                }
                None if ready => break,
                None => {
                    spaced = true;
                    let delay = self.config.draw_delay();
                    if !delay.is_zero() {
                        tracing::debug!(source = %self.source, delay_ms = delay.as_millis() as u64, "Applying request spacing");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        started.elapsed()
    }

    /// Record a successful upstream call. Never alters window or breaker.
    pub fn record_success(&self) {
        let mut state = self.lock_state();
        state.successes += 1;
        state.last_success = Some(Instant::now());
    }

    /// Open the breaker after an observed upstream throttle
    pub fn trip_breaker(&self, cooldown: Duration) {
        let mut state = self.lock_state();
        state.breaker.trip(Instant::now(), cooldown);
        tracing::warn!(
            source = %self.source,
            cooldown_secs = cooldown.as_secs(),
            trips = state.breaker.trips(),
            "Upstream throttled, circuit breaker TRIPPED"
        );
    }

    /// Trip the breaker with the configured cooldown
    pub fn trip_default(&self) {
        self.trip_breaker(self.config.breaker_cooldown());
    }

    pub fn status(&self) -> GovernorStatus {
        let now = Instant::now();
        let mut state = self.lock_state();
        state.window.prune(now);
        GovernorStatus {
            source: self.source.clone(),
            calls_in_window: state.window.len(),
            max_requests: self.config.max_requests,
            breaker: state.breaker.state(now),
            successes: state.successes,
        }
    }

    /// Admission instants currently inside the window
    pub fn window_snapshot(&self) -> Vec<Instant> {
        self.lock_state().window.entries().copied().collect()
    }
}

/// Governors keyed by source
#[derive(Debug)]
pub struct GovernorRegistry {
    governors: Mutex<HashMap<String, Arc<RateGovernor>>>,
    fallback: GovernorConfig,
}

impl Default for GovernorRegistry {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

impl GovernorRegistry {
    /// `fallback` configures sources that were never registered
    pub fn new(fallback: GovernorConfig) -> Self {
        Self {
            governors: Mutex::new(HashMap::new()),
            fallback,
        }
    }

    /// Register a source with its own settings, replacing any previous governor
    pub fn register(&self, source: &str, config: GovernorConfig) -> Arc<RateGovernor> {
        let governor = Arc::new(RateGovernor::new(source, config));
        self.governors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.to_string(), Arc::clone(&governor));
        governor
    }

    /// Governor for `source`, created from the fallback settings if unknown
    pub fn governor(&self, source: &str) -> Arc<RateGovernor> {
        let mut governors = self.governors.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(governors.entry(source.to_string()).or_insert_with(|| {
            tracing::warn!(source, "No governor registered for source, using fallback limits");
            Arc::new(RateGovernor::new(source, self.fallback.clone()))
        }))
    }

    pub async fn admit(&self, source: &str) -> Duration {
        self.governor(source).admit().await
    }

    pub fn record_success(&self, source: &str) {
        self.governor(source).record_success();
    }

    pub fn trip_breaker(&self, source: &str, cooldown: Duration) {
        self.governor(source).trip_breaker(cooldown);
    }

    pub fn statuses(&self) -> Vec<GovernorStatus> {
        let governors: Vec<Arc<RateGovernor>> = self
            .governors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut statuses: Vec<GovernorStatus> = governors.iter().map(|g| g.status()).collect();
        statuses.sort_by(|a, b| a.source.cmp(&b.source));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_delay(window_secs: u64, max_requests: usize) -> GovernorConfig {
        GovernorConfig {
            window_secs,
            max_requests,
            min_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
            breaker_cooldown_secs: 300,
        }
    }

    /// Largest number of admissions falling inside any half-open window span
    fn max_in_any_window(times: &[Instant], window: Duration) -> usize {
        times
            .iter()
            .map(|start| {
                times
                    .iter()
                    .filter(|t| **t >= *start && t.duration_since(*start) < window)
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn test_default_config() {
        let config = GovernorConfig::default();
        assert_eq!(config.window_secs, 60);
        assert_eq!(config.max_requests, 8);
        assert_eq!(config.min_delay_ms, 8_000);
        assert_eq!(config.max_delay_ms, 12_000);
        assert_eq!(config.breaker_cooldown_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flat_config() {
        let config = GovernorConfig::flat(3_000);
        assert_eq!(config.min_delay_ms, 3_000);
        assert_eq!(config.max_delay_ms, 3_000);
        assert_eq!(config.jitter_ms, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = GovernorConfig::default();
        config.max_requests = 0;
        assert_eq!(config.validate(), Err(GovernorConfigError::ZeroCapacity));

        let mut config = GovernorConfig::default();
        config.window_secs = 0;
        assert_eq!(config.validate(), Err(GovernorConfigError::ZeroWindow));

        let mut config = GovernorConfig::default();
        config.min_delay_ms = 5_000;
        config.max_delay_ms = 1_000;
        assert!(matches!(config.validate(), Err(GovernorConfigError::InvertedDelay { .. })));
    }

    #[test]
    fn test_draw_delay_within_bounds() {
        let config = GovernorConfig::default();
        for _ in 0..200 {
            let delay = config.draw_delay();
            assert!(delay >= Duration::from_millis(8_000));
            assert!(delay <= Duration::from_millis(12_500));
        }
    }

    #[test]
    fn test_window_prune_and_slot() {
        let start = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(10), 2);
        window.push(start);
        window.push(start + Duration::from_secs(4));
        assert!(window.is_full());
        assert_eq!(
            window.next_free_slot(),
            Some(start + Duration::from_secs(10) + WINDOW_EXIT_MARGIN)
        );

        window.prune(start + Duration::from_secs(10));
        assert_eq!(window.len(), 1);
        assert!(window.next_free_slot().is_none());

        window.prune(start + Duration::from_secs(20));
        assert!(window.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_under_capacity_is_immediate_without_delay() {
        let governor = RateGovernor::new("test", no_delay(60, 3));
        let waited = governor.admit().await;
        assert_eq!(waited, Duration::ZERO);
        assert_eq!(governor.window_snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_applies_flat_delay() {
        let governor = RateGovernor::new("search", GovernorConfig::flat(3_000));
        let waited = governor.admit().await;
        assert_eq!(waited, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_never_exceeds_cap() {
        let config = no_delay(10, 3);
        let governor = RateGovernor::new("test", config.clone());
        let mut admitted = Vec::new();

        for _ in 0..12 {
            governor.admit().await;
            admitted.push(Instant::now());
        }

        assert!(max_in_any_window(&admitted, config.window()) <= 3);
        // The 4th call had to wait for the first to leave the window
        assert!(admitted[3].duration_since(admitted[0]) > Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_admissions_respect_cap() {
        let config = no_delay(10, 2);
        let governor = Arc::new(RateGovernor::new("shared", config.clone()));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let governor = Arc::clone(&governor);
            handles.push(tokio::spawn(async move {
                governor.admit().await;
                Instant::now()
            }));
        }

        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap());
        }
        admitted.sort();
        assert!(max_in_any_window(&admitted, config.window()) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_suspends_until_reset() {
        let governor = RateGovernor::new("test", no_delay(60, 8));
        let tripped_at = Instant::now();
        governor.trip_breaker(Duration::from_secs(300));

        governor.admit().await;
        assert!(Instant::now() >= tripped_at + Duration::from_secs(300));

        // Breaker closed after the cooldown; next admission is immediate
        let before = Instant::now();
        governor.admit().await;
        assert_eq!(Instant::now(), before);
        assert!(governor.status().breaker.status.allows_calls());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trip_during_spacing_delay_suspends_admission() {
        let governor = Arc::new(RateGovernor::new("search", GovernorConfig::flat(10_000)));
        let start = Instant::now();

        let waiter = {
            let governor = Arc::clone(&governor);
            tokio::spawn(async move {
                governor.admit().await;
                Instant::now()
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        governor.trip_breaker(Duration::from_secs(300));

        let admitted_at = waiter.await.unwrap();
        assert!(admitted_at >= start + Duration::from_secs(301));
        assert_eq!(governor.window_snapshot(), vec![admitted_at]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_success_does_not_touch_window() {
        let governor = RateGovernor::new("test", no_delay(60, 2));
        governor.record_success();
        governor.record_success();

        let status = governor.status();
        assert_eq!(status.successes, 2);
        assert_eq!(status.calls_in_window, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_isolates_sources() {
        let registry = GovernorRegistry::new(no_delay(60, 8));
        registry.register("top_traded", no_delay(60, 8));
        registry.register("search", no_delay(60, 8));

        registry.trip_breaker("top_traded", Duration::from_secs(300));

        let before = Instant::now();
        registry.admit("search").await;
        assert_eq!(Instant::now(), before);

        let statuses = registry.statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].source, "search");
        assert!(statuses[0].breaker.status.allows_calls());
        assert!(!statuses[1].breaker.status.allows_calls());
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_shares_governor_per_source() {
        let registry = GovernorRegistry::default();
        let a = registry.governor("feed");
        let b = registry.governor("feed");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
