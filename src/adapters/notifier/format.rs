//! Alert rendering shared by notifiers

use crate::domain::{fee_estimator, short_address};
use crate::ports::Alert;

/// One-line headline for an alert
pub fn alert_title(alert: &Alert) -> String {
    format!(
        "New DLMM candidate {} ({}) from {} | score {:.2}",
        alert.candidate.symbol,
        short_address(&alert.candidate.address),
        alert.feed,
        alert.score
    )
}

/// Ordered `(label, value)` pairs; unknown figures are omitted
pub fn alert_fields(alert: &Alert) -> Vec<(String, String)> {
    let c = &alert.candidate;
    let mut fields = Vec::new();

    if let Some(cap) = c.market_cap {
        fields.push(("Market cap".to_string(), format!("${}", compact(cap))));
    }
    if let Some(volume) = c.volume_24h {
        fields.push(("Volume 24h".to_string(), format!("${}", compact(volume))));
    }
    if let Some(fee) = alert.fee_native {
        fields.push(("Fees (SOL)".to_string(), format!("{:.2}", fee)));
    }
    if let Some(change) = c.price_change_1h {
        fields.push(("1h".to_string(), format!("{:+.1}%", change)));
    }
    if let Some(change) = c.price_change_24h {
        fields.push(("24h".to_string(), format!("{:+.1}%", change)));
    }
    if let Some(created) = c.created_at {
        let hours = (c.observed_at - created).num_minutes() as f64 / 60.0;
        fields.push(("Age".to_string(), format!("{:.1}h", hours)));
    }
    if let Some(estimate) = &alert.fee_estimate {
        let marker = if estimate.approximate { "~" } else { "" };
        fields.push((
            "LP rent".to_string(),
            format!(
                "{}{:.4} SOL ({:.4} refundable)",
                marker,
                estimate.total_sol(),
                fee_estimator::lamports_to_sol(estimate.refundable_total)
            ),
        ));
        fields.push(("Bins".to_string(), estimate.bin_count.to_string()));
    }
    fields
}

/// `1.25M`, `340.0K` style figures
pub fn compact(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1e9 {
        format!("{:.2}B", value / 1e9)
    } else if abs >= 1e6 {
        format!("{:.2}M", value / 1e6)
    } else if abs >= 1e3 {
        format!("{:.1}K", value / 1e3)
    } else {
        format!("{:.2}", value)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{fee_estimator, Candidate, EstimateRequest};
    use chrono::{Duration, Utc};

    pub(crate) fn sample_alert() -> Alert {
        let now = Utc::now();
        let candidate = Candidate {
            address: "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263".to_string(),
            symbol: "BONK".to_string(),
            name: "Bonk".to_string(),
            market_cap: Some(1_250_000.0),
            volume_24h: Some(340_000.0),
            fee_estimate_native: Some(25.0),
            fee_estimate_quote: None,
            price_change_1h: Some(31.0),
            price_change_24h: None,
            observed_at: now,
            created_at: Some(now - Duration::minutes(90)),
            source: "top_traded".to_string(),
        };
        let estimate = fee_estimator::estimate(&EstimateRequest::new_position(-20, 20, 100)).ok();
        Alert {
            feed: "top".to_string(),
            candidate,
            score: 10.75,
            fee_native: Some(25.0),
            fee_estimate: estimate,
        }
    }

    #[test]
    fn test_compact() {
        assert_eq!(compact(1_250_000.0), "1.25M");
        assert_eq!(compact(340_000.0), "340.0K");
        assert_eq!(compact(3_200_000_000.0), "3.20B");
        assert_eq!(compact(12.0), "12.00");
    }

    #[test]
    fn test_fields_skip_unknown() {
        let alert = sample_alert();
        let fields = alert_fields(&alert);
        let labels: Vec<_> = fields.iter().map(|(l, _)| l.as_str()).collect();
        assert!(labels.contains(&"Market cap"));
        assert!(labels.contains(&"LP rent"));
        assert!(!labels.contains(&"24h"));
        assert!(fields.iter().any(|(l, v)| l == "Age" && v == "1.5h"));
    }

    #[test]
    fn test_title() {
        let title = alert_title(&sample_alert());
        assert!(title.contains("BONK"));
        assert!(title.contains("DezX...B263"));
        assert!(title.contains("10.75"));
    }
}
