//! Field extraction with ordered fallbacks
//!
//! Upstream listings disagree on field names and on whether numbers arrive
//! as JSON numbers or strings. Each snapshot field is described by an ordered
//! list of JSON pointers; the first pointer that resolves to a parsable value
//! wins, and a field with no usable pointer is `None`.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::domain::RawSnapshot;

/// Unix timestamps above this are treated as milliseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Ordered JSON pointers for every snapshot field
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    pub address: &'static [&'static str],
    pub symbol: &'static [&'static str],
    pub name: &'static [&'static str],
    pub market_cap: &'static [&'static str],
    pub volume_24h: &'static [&'static str],
    pub fee_native: &'static [&'static str],
    pub fee_quote: &'static [&'static str],
    pub price_change_1h: &'static [&'static str],
    pub price_change_24h: &'static [&'static str],
    pub created_at: &'static [&'static str],
}

impl FieldMap {
    /// Map one upstream record into a snapshot
    pub fn snapshot(&self, record: &Value) -> RawSnapshot {
        RawSnapshot {
            address: extract_string(record, self.address),
            symbol: extract_string(record, self.symbol),
            name: extract_string(record, self.name),
            market_cap: extract_f64(record, self.market_cap),
            volume_24h: extract_f64(record, self.volume_24h),
            fee_native: extract_f64(record, self.fee_native),
            fee_quote: extract_f64(record, self.fee_quote),
            price_change_1h: extract_f64(record, self.price_change_1h),
            price_change_24h: extract_f64(record, self.price_change_24h),
            created_at: extract_datetime(record, self.created_at),
        }
    }
}

/// First non-empty string at any of `paths`
pub fn extract_string(record: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|path| match record.pointer(path)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

/// First finite number at any of `paths`, accepting numeric strings
pub fn extract_f64(record: &Value, paths: &[&str]) -> Option<f64> {
    paths
        .iter()
        .find_map(|path| record.pointer(path).and_then(parse_f64))
}

/// First timestamp at any of `paths`: RFC 3339 strings or unix seconds/millis
pub fn extract_datetime(record: &Value, paths: &[&str]) -> Option<DateTime<Utc>> {
    paths
        .iter()
        .find_map(|path| record.pointer(path).and_then(parse_datetime))
}

fn parse_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
                return Some(dt.with_timezone(&Utc));
            }
            s.trim().parse::<i64>().ok().and_then(from_unix)
        }
        Value::Number(n) => n.as_i64().and_then(from_unix),
        _ => None,
    }
}

fn from_unix(ts: i64) -> Option<DateTime<Utc>> {
    if ts <= 0 {
        return None;
    }
    if ts > MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(ts).single()
    } else {
        Utc.timestamp_opt(ts, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fallback_order() {
        let record = json!({ "mc": null, "marketCap": "1250000.5", "fdv": 9.0 });
        let value = extract_f64(&record, &["/mc", "/marketCap", "/fdv"]);
        assert_eq!(value, Some(1_250_000.5));
    }

    #[test]
    fn test_unparsable_paths_yield_none() {
        let record = json!({ "mc": "n/a", "volume": { "h24": [] } });
        assert_eq!(extract_f64(&record, &["/mc", "/volume/h24", "/missing"]), None);
    }

    #[test]
    fn test_nested_pointer_and_blank_string() {
        let record = json!({ "baseToken": { "symbol": "  ", "name": "Bonk" } });
        assert_eq!(extract_string(&record, &["/baseToken/symbol"]), None);
        assert_eq!(
            extract_string(&record, &["/baseToken/symbol", "/baseToken/name"]),
            Some("Bonk".to_string())
        );
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let record = json!({
            "secs": 1_704_067_200,
            "millis": 1_704_067_200_000i64,
            "rfc": "2024-01-01T00:00:00Z",
            "text": "1704067200"
        });
        assert_eq!(extract_datetime(&record, &["/secs"]), Some(expected));
        assert_eq!(extract_datetime(&record, &["/millis"]), Some(expected));
        assert_eq!(extract_datetime(&record, &["/rfc"]), Some(expected));
        assert_eq!(extract_datetime(&record, &["/text"]), Some(expected));
    }

    #[test]
    fn test_snapshot_mapping() {
        static MAP: FieldMap = FieldMap {
            address: &["/address"],
            symbol: &["/symbol"],
            name: &["/name"],
            market_cap: &["/mc"],
            volume_24h: &["/v24hUSD"],
            fee_native: &[],
            fee_quote: &[],
            price_change_1h: &["/priceChange1hPercent"],
            price_change_24h: &[],
            created_at: &[],
        };
        let record = json!({
            "address": "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263",
            "symbol": "BONK",
            "mc": 500000,
            "v24hUSD": "120000",
            "priceChange1hPercent": 31.5
        });
        let snapshot = MAP.snapshot(&record);
        assert_eq!(snapshot.symbol.as_deref(), Some("BONK"));
        assert_eq!(snapshot.market_cap, Some(500_000.0));
        assert_eq!(snapshot.volume_24h, Some(120_000.0));
        assert_eq!(snapshot.price_change_1h, Some(31.5));
        assert_eq!(snapshot.fee_native, None);
        assert_eq!(snapshot.name, None);
    }
}
