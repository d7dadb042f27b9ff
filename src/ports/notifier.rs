//! Notifier port
//!
//! Downstream delivery of one resolved alert. The collaborator owns all
//! presentation; the core only needs to know whether delivery succeeded so
//! it can decide whether to record the address as notified.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{Candidate, FeeEstimate};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Notifier misconfigured: {0}")]
    Misconfigured(String),
}

/// Everything the notifier needs to render one alert
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    /// Feed that produced the alert
    pub feed: String,
    pub candidate: Candidate,
    pub score: f64,
    /// Fee signal in native units used for qualification
    pub fee_native: Option<f64>,
    /// Rent estimate for providing liquidity, if it could be computed
    pub fee_estimate: Option<FeeEstimate>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}
