//! Recording mocks for the source and notifier ports
//!
//! Used by unit and integration tests to drive the pipeline without network
//! access.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::market_data::{CandidateSource, FilterParams, SourceError};
use super::notifier::{Alert, Notifier, NotifyError};
use crate::domain::RawSnapshot;

/// Mock source returning queued responses, then repeating its default
#[derive(Debug, Clone)]
pub struct MockSource {
    key: String,
    queued: Arc<Mutex<VecDeque<Result<Vec<RawSnapshot>, SourceError>>>>,
    default: Arc<Mutex<Vec<RawSnapshot>>>,
    calls: Arc<Mutex<Vec<FilterParams>>>,
}

impl MockSource {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            queued: Arc::new(Mutex::new(VecDeque::new())),
            default: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Builder method setting the response returned once the queue is empty
    pub fn with_snapshots(self, snapshots: Vec<RawSnapshot>) -> Self {
        *self.default.lock().unwrap_or_else(PoisonError::into_inner) = snapshots;
        self
    }

    /// Queue a one-off response
    pub fn push_response(&self, response: Result<Vec<RawSnapshot>, SourceError>) {
        self.queued.lock().unwrap_or_else(PoisonError::into_inner).push_back(response);
    }

    pub fn get_calls(&self) -> Vec<FilterParams> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl CandidateSource for MockSource {
    fn key(&self) -> &str {
        &self.key
    }

    async fn fetch(&self, params: &FilterParams) -> Result<Vec<RawSnapshot>, SourceError> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(params.clone());
        if let Some(response) = self.queued.lock().unwrap_or_else(PoisonError::into_inner).pop_front() {
            return response;
        }
        Ok(self.default.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

/// Mock notifier recording every alert it is handed
#[derive(Debug, Clone, Default)]
pub struct MockNotifier {
    delivered: Arc<Mutex<Vec<Alert>>>,
    failures_remaining: Arc<Mutex<usize>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` deliveries
    pub fn failing(self, count: usize) -> Self {
        *self.failures_remaining.lock().unwrap_or_else(PoisonError::into_inner) = count;
        self
    }

    pub fn get_alerts(&self) -> Vec<Alert> {
        self.delivered.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn delivered_addresses(&self) -> Vec<String> {
        self.get_alerts()
            .into_iter()
            .map(|a| a.candidate.address)
            .collect()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    fn name(&self) -> &str {
        "mock"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        let mut remaining = self.failures_remaining.lock().unwrap_or_else(PoisonError::into_inner);
        if *remaining > 0 {
            *remaining -= 1;
            return Err(NotifyError::DeliveryFailed("mock failure".to_string()));
        }
        drop(remaining);
        self.delivered.lock().unwrap_or_else(PoisonError::into_inner).push(alert.clone());
        Ok(())
    }
}
