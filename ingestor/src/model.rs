use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One environmental sensor reading as published on `envqmon/<device_id>`.
///
/// `co2` and `recorded_at` are only sent by some device firmwares and
/// simulator builds, so their absence is not a decode error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub co: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub co2: Option<f64>,
    pub methane: f64,
    pub lpg: f64,
    pub pm25: f64,
    pub pm10: f64,
    pub noise: f64,
    pub light: f64,
    /// Unix seconds, set by the publisher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<i64>,
}

impl TelemetryRecord {
    pub fn recorded_at_utc(&self) -> Option<DateTime<Utc>> {
        self.recorded_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// A persisted reading as returned by the REST API
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredReading {
    pub device_id: String,
    pub received_at: DateTime<Utc>,
    pub recorded_at: Option<DateTime<Utc>>,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub co: f64,
    pub co2: Option<f64>,
    pub methane: f64,
    pub lpg: f64,
    pub pm25: f64,
    pub pm10: f64,
    pub noise: f64,
    pub light: f64,
}

/// REST API response wrapper
#[derive(Debug, Serialize)]
pub struct TelemetryResponse {
    pub data: Vec<StoredReading>,
    pub total: usize,
    pub limit: i64,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"{"temperature":22.5,"humidity":55,"pressure":1012,"co":0.2,"methane":50,"lpg":30,"pm25":12,"pm10":20,"noise":45,"light":300}"#;

    #[test]
    fn test_base_schema_without_optional_fields() {
        let record: TelemetryRecord = serde_json::from_str(BASE).unwrap();
        assert_eq!(record.temperature, 22.5);
        assert_eq!(record.humidity, 55.0);
        assert_eq!(record.co2, None);
        assert_eq!(record.recorded_at, None);
        assert_eq!(record.recorded_at_utc(), None);
    }

    #[test]
    fn test_optional_fields_are_decoded() {
        let payload = r#"{"temperature":22.5,"humidity":55,"pressure":1012,"co":0.2,"co2":415.5,"methane":50,"lpg":30,"pm25":12,"pm10":20,"noise":45,"light":300,"recorded_at":1700000000}"#;
        let record: TelemetryRecord = serde_json::from_str(payload).unwrap();
        assert_eq!(record.co2, Some(415.5));
        assert_eq!(record.recorded_at, Some(1_700_000_000));
        assert_eq!(
            record.recorded_at_utc().map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let payload = r#"{"temperature":22.5,"humidity":55}"#;
        assert!(serde_json::from_str::<TelemetryRecord>(payload).is_err());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let payload = r#"{"temperature":1,"humidity":2,"pressure":3,"co":4,"methane":5,"lpg":6,"pm25":7,"pm10":8,"noise":9,"light":10,"firmware":"1.2.0"}"#;
        let record: TelemetryRecord = serde_json::from_str(payload).unwrap();
        assert_eq!(record.light, 10.0);
    }
}
