//! # Vehicle Status
//!
//! Connectivity and battery state reported by the fleet API.

/// Status of the tracked vehicle
///
/// A powered-off vehicle is a normal status (`connected == false`), not an error.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VehicleStatus {
    /// Full vehicle serial
    pub serial: String,
    /// Operator-assigned vehicle name
    pub name: Option<String>,
    /// Vendor flight status string (e.g. "FLYING", "LANDED")
    pub flight_status: Option<String>,
    /// Whether the vehicle is online with the cloud
    pub connected: bool,
    /// Whether the vehicle is currently live streaming
    pub live_streaming: bool,
    /// Battery charge in percent (0-100)
    pub battery_percent: Option<f64>,
}

impl VehicleStatus {
    /// Status for a vehicle that is known but offline
    pub fn offline(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            ..Default::default()
        }
    }
}

/// Normalize a battery reading to percent
///
/// The fleet API reports fractions (0.0-1.0); some payloads already carry percent.
pub fn battery_to_percent(value: f64) -> f64 {
    if value <= 1.0 {
        value * 100.0
    } else {
        value
    }
}
