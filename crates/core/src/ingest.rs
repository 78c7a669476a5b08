//! Coercion of loosely-typed platform payloads into [`MetricsSnapshot`].
//!
//! Advertising platforms report numbers as JSON strings, numbers or `null`
//! depending on the field and API version. Anything that does not parse is
//! treated as zero, except `quality_score`, which stays `None` when missing.

use crate::error::SourceError;
use crate::types::MetricsSnapshot;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// One unit's insights as a platform returns them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMetrics {
    #[serde(default, alias = "adset_id", alias = "id")]
    pub unit_id: Option<String>,
    #[serde(default, alias = "adset_name", alias = "name")]
    pub unit_name: Option<String>,
    #[serde(default)]
    pub spend: Value,
    #[serde(default, alias = "purchase_value", alias = "conversion_value")]
    pub revenue: Value,
    #[serde(default)]
    pub clicks: Value,
    #[serde(default)]
    pub impressions: Value,
    #[serde(default, alias = "purchases")]
    pub conversions: Value,
    #[serde(default)]
    pub ctr: Value,
    #[serde(default)]
    pub cpc: Value,
    #[serde(default)]
    pub frequency: Value,
    #[serde(default)]
    pub quality_score: Value,
    #[serde(default)]
    pub daily_budget: Value,
    #[serde(default, alias = "created_time")]
    pub created_at: Value,
}

/// Read a number out of a JSON value, tolerating numeric strings.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn coerce_count(value: &Value) -> u64 {
    coerce_f64(value)
        .filter(|n| *n > 0.0)
        .map(|n| n.round() as u64)
        .unwrap_or(0)
}

fn coerce_amount(value: &Value) -> f64 {
    coerce_f64(value).filter(|n| *n >= 0.0).unwrap_or(0.0)
}

fn coerce_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    // Graph-style offsets without a colon, e.g. `2024-01-01T00:00:00+0000`.
    if let Ok(ts) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

impl MetricsSnapshot {
    /// Build a snapshot from a raw payload. `unit_id` wins over whatever id
    /// the payload carries so that a misrouted record cannot be attributed to
    /// another unit silently.
    pub fn from_raw(
        unit_id: &str,
        raw: &RawMetrics,
        captured_at: DateTime<Utc>,
    ) -> Result<Self, SourceError> {
        if let Some(reported) = raw.unit_id.as_deref() {
            if !reported.is_empty() && reported != unit_id {
                return Err(SourceError::Malformed(format!(
                    "payload for {reported} returned when fetching {unit_id}"
                )));
            }
        }

        let spend = coerce_amount(&raw.spend);
        let clicks = coerce_count(&raw.clicks);
        let impressions = coerce_count(&raw.impressions);

        // Derive rates the platform left out.
        let ctr = coerce_f64(&raw.ctr).unwrap_or_else(|| {
            if impressions > 0 {
                clicks as f64 / impressions as f64 * 100.0
            } else {
                0.0
            }
        });
        let cpc = coerce_f64(&raw.cpc).unwrap_or_else(|| {
            if clicks > 0 {
                spend / clicks as f64
            } else {
                0.0
            }
        });

        Ok(Self {
            unit_id: unit_id.to_string(),
            unit_name: raw.unit_name.clone().filter(|n| !n.is_empty()),
            spend,
            revenue: coerce_amount(&raw.revenue),
            clicks,
            impressions,
            conversions: coerce_count(&raw.conversions),
            ctr,
            cpc,
            frequency: coerce_amount(&raw.frequency),
            quality_score: coerce_f64(&raw.quality_score),
            daily_budget: coerce_amount(&raw.daily_budget),
            unit_created_at: coerce_timestamp(&raw.created_at),
            captured_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> RawMetrics {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_string_and_null_fields_coerce() {
        let raw = parse(json!({
            "adset_id": "u1",
            "spend": "1000.50",
            "purchase_value": 6000,
            "clicks": "250",
            "impressions": null,
            "purchases": "12",
            "frequency": "bogus"
        }));
        let snap = MetricsSnapshot::from_raw("u1", &raw, Utc::now()).unwrap();

        assert!((snap.spend - 1000.5).abs() < 1e-9);
        assert!((snap.revenue - 6000.0).abs() < 1e-9);
        assert_eq!(snap.clicks, 250);
        assert_eq!(snap.impressions, 0);
        assert_eq!(snap.conversions, 12);
        assert_eq!(snap.frequency, 0.0);
        assert_eq!(snap.quality_score, None);
    }

    #[test]
    fn test_missing_rates_are_derived() {
        let raw = parse(json!({
            "spend": 200.0,
            "clicks": 50,
            "impressions": 10000
        }));
        let snap = MetricsSnapshot::from_raw("u1", &raw, Utc::now()).unwrap();
        assert!((snap.ctr - 0.5).abs() < 1e-9);
        assert!((snap.cpc - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_denominators_stay_zero() {
        let snap = MetricsSnapshot::from_raw("u1", &RawMetrics::default(), Utc::now()).unwrap();
        assert_eq!(snap.ctr, 0.0);
        assert_eq!(snap.cpc, 0.0);
        assert_eq!(snap.spend, 0.0);
    }

    #[test]
    fn test_negative_amounts_clamped() {
        let raw = parse(json!({ "spend": -5, "conversions": -2 }));
        let snap = MetricsSnapshot::from_raw("u1", &raw, Utc::now()).unwrap();
        assert_eq!(snap.spend, 0.0);
        assert_eq!(snap.conversions, 0);
    }

    #[test]
    fn test_mismatched_unit_rejected() {
        let raw = parse(json!({ "adset_id": "other", "spend": 10 }));
        let err = MetricsSnapshot::from_raw("u1", &raw, Utc::now()).unwrap_err();
        assert!(matches!(err, SourceError::Malformed(_)));
    }

    #[test]
    fn test_created_time_formats() {
        let raw = parse(json!({ "created_time": "2024-01-05T08:00:00+0000" }));
        let snap = MetricsSnapshot::from_raw("u1", &raw, Utc::now()).unwrap();
        assert!(snap.unit_created_at.is_some());

        let raw = parse(json!({ "created_at": "2024-01-05T08:00:00Z" }));
        let snap = MetricsSnapshot::from_raw("u1", &raw, Utc::now()).unwrap();
        assert!(snap.unit_created_at.is_some());
    }
}
