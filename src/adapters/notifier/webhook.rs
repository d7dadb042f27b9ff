//! Webhook notifier
//!
//! Posts a Discord-compatible JSON payload (`content` plus one embed) to a
//! configured webhook URL.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::format::{alert_fields, alert_title};
use crate::ports::{Alert, Notifier, NotifyError};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Embed accent colour
const EMBED_COLOUR: u32 = 0x00_b8_94;

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    http: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(NotifyError::Misconfigured(format!(
                "webhook url must be http(s): '{}'",
                url
            )));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| NotifyError::Misconfigured(e.to_string()))?;
        Ok(Self { url, http })
    }

    /// Request body for one alert
    pub fn payload(alert: &Alert) -> Value {
        let fields: Vec<Value> = alert_fields(alert)
            .into_iter()
            .map(|(name, value)| json!({ "name": name, "value": value, "inline": true }))
            .collect();

        json!({
            "content": alert_title(alert),
            "embeds": [{
                "title": format!("{} ({})", alert.candidate.name, alert.candidate.symbol),
                "description": alert.candidate.address,
                "color": EMBED_COLOUR,
                "fields": fields,
                "timestamp": alert.candidate.observed_at.to_rfc3339(),
            }]
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.url)
            .json(&Self::payload(alert))
            .send()
            .await
            .map_err(|e| NotifyError::DeliveryFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::DeliveryFailed(format!("HTTP {}", status)));
        }
        Ok(())
    }
}
