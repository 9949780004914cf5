use crate::errors::{Error, Result};
use crate::model::TelemetryRecord;

/// First topic segment for every telemetry publish.
pub const TOPIC_PREFIX: &str = "envqmon";
/// Single-level wildcard subscription covering every device.
pub const TOPIC_FILTER: &str = "envqmon/+";

const PREVIEW_LIMIT: usize = 256;

/// Extracts the device identifier from an `envqmon/<device_id>` topic.
pub fn device_id_from_topic(topic: &str) -> Result<&str> {
    let mut segments = topic.split('/');

    if segments.next() != Some(TOPIC_PREFIX) {
        return Err(Error::MalformedTopic {
            topic: topic.to_string(),
            reason: "unexpected topic prefix",
        });
    }

    match segments.next() {
        Some(device_id) if !device_id.is_empty() => Ok(device_id),
        Some(_) => Err(Error::MalformedTopic {
            topic: topic.to_string(),
            reason: "empty device segment",
        }),
        None => Err(Error::MalformedTopic {
            topic: topic.to_string(),
            reason: "missing device segment",
        }),
    }
}

/// Parses a JSON object payload into a record. A payload lacking any required
/// field is rejected here so it never reaches a sink.
pub fn decode_payload(topic: &str, payload: &[u8]) -> Result<TelemetryRecord> {
    let malformed = |source| Error::MalformedPayload {
        topic: topic.to_string(),
        source,
    };

    let value: serde_json::Value = serde_json::from_slice(payload).map_err(malformed)?;
    // Structs would otherwise also accept positional arrays.
    if !value.is_object() {
        return Err(malformed(serde::de::Error::custom("expected a JSON object")));
    }
    serde_json::from_value(value).map_err(malformed)
}

/// Lossy, truncated rendering of a payload for diagnostics.
pub fn payload_preview(payload: &[u8]) -> String {
    if payload.len() <= PREVIEW_LIMIT {
        return String::from_utf8_lossy(payload).into_owned();
    }
    format!(
        "{}... ({} bytes)",
        String::from_utf8_lossy(&payload[..PREVIEW_LIMIT]),
        payload.len()
    )
}
