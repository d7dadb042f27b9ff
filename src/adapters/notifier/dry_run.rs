//! Dry-run notifier writing alerts to the log

use async_trait::async_trait;

use super::format::{alert_fields, alert_title};
use crate::ports::{Alert, Notifier, NotifyError};

#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        let details = alert_fields(alert)
            .into_iter()
            .map(|(label, value)| format!("{}={}", label, value))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(
            address = %alert.candidate.address,
            feed = %alert.feed,
            "[DRY RUN] {} [{}]",
            alert_title(alert),
            details
        );
        Ok(())
    }
}
