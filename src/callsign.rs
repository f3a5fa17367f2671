//! # Call Sign
//!
//! Device identity used to address position reports downstream.
//!
//! A call sign is `connect_key-device_id`, where the connect key is chosen by the
//! operator and the device id is the last four characters of the vehicle serial.
//! The tracker treats it as a fixed identity, so it is resolved once at startup.

use std::fmt;

use crate::error::{RelayError, Result};

/// Number of serial characters used as the device id
pub const DEVICE_ID_LEN: usize = 4;

/// Downstream device identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSign {
    connect_key: String,
    device_id: String,
}

impl CallSign {
    /// Operator-chosen prefix
    pub fn connect_key(&self) -> &str {
        &self.connect_key
    }

    /// Last four characters of the vehicle serial
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl fmt::Display for CallSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.connect_key, self.device_id)
    }
}

/// Resolve the call sign from configuration
///
/// # Arguments
///
/// * `connect_key` - Operator-chosen prefix (no hyphens)
/// * `vehicle_serial` - Full vehicle serial
///
/// # Errors
///
/// - `InvalidConnectKey` if the key is empty or contains `-`
/// - `InvalidSerial` if the serial has fewer than 4 characters
///
/// # Examples
///
/// ```
/// use sar_relay::callsign::resolve;
///
/// let call_sign = resolve("CITY_SAR", "SkydioX10-x8a8")?;
/// assert_eq!(call_sign.to_string(), "CITY_SAR-x8a8");
/// # Ok::<(), sar_relay::error::RelayError>(())
/// ```
pub fn resolve(connect_key: &str, vehicle_serial: &str) -> Result<CallSign> {
    if connect_key.is_empty() || connect_key.contains('-') {
        return Err(RelayError::InvalidConnectKey(connect_key.to_string()));
    }

    let char_count = vehicle_serial.chars().count();
    if char_count < DEVICE_ID_LEN {
        return Err(RelayError::InvalidSerial(vehicle_serial.to_string()));
    }

    let device_id: String = vehicle_serial
        .chars()
        .skip(char_count - DEVICE_ID_LEN)
        .collect();

    Ok(CallSign {
        connect_key: connect_key.to_string(),
        device_id,
    })
}
