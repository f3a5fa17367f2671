//! # Telemetry Extraction
//!
//! Pulls coordinates, timestamps and vehicle status out of fleet API payloads.
//!
//! The live telemetry payload is not fixed: coordinates may sit at the top level
//! or under a `gps` / `location` / `position` / `coordinates` object, and values
//! may be numbers or numeric strings.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::{RelayError, Result};
use crate::telemetry::vehicle::battery_to_percent;
use crate::telemetry::{PositionFix, VehicleStatus};

const LATITUDE_FIELDS: &[&str] = &["latitude", "lat", "gps_lat", "position_lat"];
const LONGITUDE_FIELDS: &[&str] = &["longitude", "lon", "lng", "gps_lon", "position_lon"];
const NESTED_KEYS: &[&str] = &["gps", "location", "position", "coordinates"];
const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "time", "utime"];
const SEQUENCE_FIELDS: &[&str] = &["seq", "sequence", "message_id", "msg_id"];

/// Envelope status code for a successful call
const ENVELOPE_OK: i64 = 200;

/// Unwrap the `{"status_code", "data", "error_message"}` envelope
///
/// A non-200 `status_code` is an error even if the HTTP status was 200.
pub fn unwrap_envelope(body: Value) -> Result<Value> {
    let status_code = body.get("status_code").and_then(Value::as_i64);

    match status_code {
        Some(ENVELOPE_OK) => Ok(body.get("data").cloned().unwrap_or(Value::Null)),
        Some(code @ (401 | 403)) => Err(RelayError::SourceAuthError(format!(
            "API status {}: {}",
            code,
            error_message(&body)
        ))),
        Some(code) => Err(RelayError::SourceUnavailable(format!(
            "API status {}: {}",
            code,
            error_message(&body)
        ))),
        None => Err(RelayError::SourceUnavailable(
            "response missing status_code".to_string(),
        )),
    }
}

fn error_message(body: &Value) -> &str {
    body.get("error_message")
        .and_then(Value::as_str)
        .unwrap_or("Unknown error")
}

/// Find the configured vehicle in a `v0/vehicles` data payload
///
/// # Errors
///
/// Returns `SourceUnavailable` if the payload has no vehicle list or the
/// serial is not part of the fleet.
pub fn vehicle_status(data: &Value, serial: &str) -> Result<VehicleStatus> {
    let vehicles = data
        .get("vehicles")
        .and_then(Value::as_array)
        .ok_or_else(|| RelayError::SourceUnavailable("response has no vehicle list".to_string()))?;

    let vehicle = vehicles
        .iter()
        .find(|v| v.get("vehicle_serial").and_then(Value::as_str) == Some(serial))
        .ok_or_else(|| {
            RelayError::SourceUnavailable(format!("vehicle {} not found in fleet", serial))
        })?;

    let text = |key: &str| vehicle.get(key).and_then(Value::as_str).map(str::to_string);
    let flag = |key: &str| vehicle.get(key).and_then(Value::as_bool).unwrap_or(false);

    Ok(VehicleStatus {
        serial: serial.to_string(),
        name: text("name"),
        flight_status: text("flight_status"),
        connected: flag("is_online"),
        live_streaming: flag("is_live_streaming"),
        battery_percent: vehicle
            .get("battery_status")
            .and_then(|b| b.get("percentage"))
            .and_then(number)
            .map(battery_to_percent),
    })
}

/// Build a position fix from a live telemetry payload
///
/// `received_at` is used when the payload carries no usable timestamp.
///
/// # Errors
///
/// - `SourceNoFix` when the payload has no coordinates
/// - `InvalidFix` when the coordinates are out of range
pub fn position_fix(telemetry: &Value, received_at: DateTime<Utc>) -> Result<PositionFix> {
    let (latitude, longitude) = coordinates(telemetry).ok_or(RelayError::SourceNoFix)?;

    let timestamp = first_field(telemetry, TIMESTAMP_FIELDS)
        .and_then(parse_timestamp)
        .unwrap_or(received_at);

    let sequence = first_field(telemetry, SEQUENCE_FIELDS).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    PositionFix::try_new(latitude, longitude, timestamp, sequence)
}

/// Extract (latitude, longitude), preferring top-level fields over nested ones
pub fn coordinates(telemetry: &Value) -> Option<(f64, f64)> {
    let direct = (
        first_number(telemetry, LATITUDE_FIELDS),
        first_number(telemetry, LONGITUDE_FIELDS),
    );
    if let (Some(lat), Some(lon)) = direct {
        return Some((lat, lon));
    }

    NESTED_KEYS
        .iter()
        .filter_map(|key| telemetry.get(*key).filter(|v| v.is_object()))
        .find_map(|nested| {
            let lat = direct.0.or_else(|| first_number(nested, LATITUDE_FIELDS))?;
            let lon = direct.1.or_else(|| first_number(nested, LONGITUDE_FIELDS))?;
            Some((lat, lon))
        })
}

fn first_field<'a>(value: &'a Value, fields: &[&str]) -> Option<&'a Value> {
    fields
        .iter()
        .filter_map(|f| value.get(*f))
        .find(|v| !v.is_null())
}

fn first_number(value: &Value, fields: &[&str]) -> Option<f64> {
    fields.iter().filter_map(|f| value.get(*f)).find_map(number)
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse an RFC 3339 string or an epoch number (seconds, millis or micros)
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(s) = value.as_str() {
        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    let raw = number(value)?;
    if !raw.is_finite() || raw <= 0.0 {
        return None;
    }

    let micros = if raw >= 1e15 {
        raw
    } else if raw >= 1e12 {
        raw * 1e3
    } else {
        raw * 1e6
    };
    Utc.timestamp_micros(micros as i64).single()
}
