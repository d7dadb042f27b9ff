//! Circuit Breaker
//!
//! Upstream throttle protection. When a source answers with a rate-limit
//! response, the breaker opens for a fixed cooldown and every admission to
//! that source is suspended until the cooldown has elapsed.
//!
//! There is no half-open probing state: the breaker closes automatically once
//! `now >= resets_at`, and tripping an already open breaker re-arms the
//! cooldown from the current instant.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Default cooldown after an observed upstream throttle
pub const DEFAULT_BREAKER_COOLDOWN_SECS: u64 = 300;

/// Status of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitBreakerStatus {
    /// Calls are allowed
    Closed,
    /// Calls are suspended until the cooldown ends
    Open,
}

impl CircuitBreakerStatus {
    /// Returns true if calls may proceed
    pub fn allows_calls(&self) -> bool {
        matches!(self, CircuitBreakerStatus::Closed)
    }

    /// Returns a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            CircuitBreakerStatus::Closed => "Closed - upstream calls allowed",
            CircuitBreakerStatus::Open => "OPEN - upstream throttled, calls suspended",
        }
    }
}

/// Snapshot of the breaker for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerState {
    pub status: CircuitBreakerStatus,
    /// Seconds until the breaker closes, if open
    pub cooldown_remaining_secs: Option<u64>,
    /// Number of trips since creation
    pub trips: u64,
}

/// Throttle circuit breaker for a single upstream source
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    active: bool,
    resets_at: Option<Instant>,
    trips: u64,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            active: false,
            resets_at: None,
            trips: 0,
        }
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the breaker until `now + cooldown`
    pub fn trip(&mut self, now: Instant, cooldown: Duration) {
        self.active = true;
        self.resets_at = Some(now + cooldown);
        self.trips += 1;
    }

    /// Whether the breaker is open at `now`
    pub fn is_open_at(&self, now: Instant) -> bool {
        match (self.active, self.resets_at) {
            (true, Some(resets_at)) => now < resets_at,
            _ => false,
        }
    }

    /// Instant at which an open breaker closes
    pub fn resets_at(&self) -> Option<Instant> {
        if self.active {
            self.resets_at
        } else {
            None
        }
    }

    /// Close the breaker if its cooldown has elapsed.
    ///
    /// Returns true if the breaker transitioned from open to closed.
    pub fn try_close(&mut self, now: Instant) -> bool {
        if self.active && !self.is_open_at(now) {
            self.active = false;
            self.resets_at = None;
            tracing::info!("Circuit breaker cooldown complete, closing");
            return true;
        }
        false
    }

    pub fn status(&self, now: Instant) -> CircuitBreakerStatus {
        if self.is_open_at(now) {
            CircuitBreakerStatus::Open
        } else {
            CircuitBreakerStatus::Closed
        }
    }

    pub fn state(&self, now: Instant) -> CircuitBreakerState {
        let cooldown_remaining_secs = self
            .resets_at()
            .filter(|_| self.is_open_at(now))
            .map(|at| at.saturating_duration_since(now).as_secs());

        CircuitBreakerState {
            status: self.status(now),
            cooldown_remaining_secs,
            trips: self.trips,
        }
    }

    pub fn trips(&self) -> u64 {
        self.trips
    }
}
