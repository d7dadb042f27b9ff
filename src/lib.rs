//! dlmm-scout - Rate-governed token feed scanner library
//!
//! Polls market-data feeds under per-source rate limits, qualifies and scores
//! tokens, annotates the winner with a DLMM liquidity cost estimate and
//! notifies each address at most once per dedup epoch.
//!
//! # Modules
//!
//! - `domain`: Core logic (RateGovernor, Candidate, qualification, FeeEstimate, NotificationStore)
//! - `ports`: Trait abstractions (CandidateSource, Notifier)
//! - `adapters`: External implementations (HTTP feeds, webhook, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: Poll pipeline and scheduler

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod config;
pub mod application;
