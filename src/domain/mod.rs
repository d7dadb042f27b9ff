//! Domain Layer - Core logic for the token scout
//!
//! Pure types and state machines with no network access. All external
//! interactions happen through the ports layer.
//!
//! - `rate_governor`: Sliding-window limiter per upstream source
//! - `circuit_breaker`: Throttle cooldown used by the governor
//! - `candidate`: Validated per-cycle token observations
//! - `qualification`: Threshold predicates and ranking score
//! - `fee_estimator`: DLMM position rent arithmetic
//! - `notification_store`: Persisted dedup records

pub mod rate_governor;
pub mod circuit_breaker;
pub mod candidate;
pub mod qualification;
pub mod fee_estimator;
pub mod notification_store;

pub use rate_governor::{GovernorConfig, GovernorConfigError, GovernorRegistry, GovernorStatus, RateGovernor, RateWindow};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitBreakerStatus};
pub use candidate::{Candidate, CandidateError, RawSnapshot, is_valid_address, short_address};
pub use qualification::{Evaluation, Rejection, ScoringConfig, Thresholds, evaluate, fee_native, score};
pub use fee_estimator::{EstimateError, EstimateRequest, FeeEstimate, RegionMembership};
pub use notification_store::{NotificationRecords, NotificationStore, PersistError, RecoveryStatus};
