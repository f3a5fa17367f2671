//! # Position Fix
//!
//! A single normalized latitude/longitude reading taken from the vehicle.

use chrono::{DateTime, Utc};

use crate::error::{RelayError, Result};

/// Valid latitude range in decimal degrees
pub const LATITUDE_RANGE: std::ops::RangeInclusive<f64> = -90.0..=90.0;

/// Valid longitude range in decimal degrees
pub const LONGITUDE_RANGE: std::ops::RangeInclusive<f64> = -180.0..=180.0;

/// Immutable position snapshot
///
/// Construct with [`PositionFix::try_new`] to enforce the coordinate range, or
/// with [`PositionFix::new`] when the value comes from a source that is checked
/// later via [`PositionFix::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFix {
    latitude: f64,
    longitude: f64,
    timestamp_utc: DateTime<Utc>,
    source_sequence: Option<String>,
}

impl PositionFix {
    /// Build a fix without range checking
    pub fn new(
        latitude: f64,
        longitude: f64,
        timestamp_utc: DateTime<Utc>,
        source_sequence: Option<String>,
    ) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_utc,
            source_sequence,
        }
    }

    /// Build a fix, rejecting out-of-range (or NaN) coordinates
    ///
    /// # Errors
    ///
    /// Returns `RelayError::InvalidFix` if latitude is outside [-90, 90] or
    /// longitude is outside [-180, 180].
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::Utc;
    /// use sar_relay::telemetry::PositionFix;
    ///
    /// assert!(PositionFix::try_new(37.7749, -122.4194, Utc::now(), None).is_ok());
    /// assert!(PositionFix::try_new(91.0, 0.0, Utc::now(), None).is_err());
    /// ```
    pub fn try_new(
        latitude: f64,
        longitude: f64,
        timestamp_utc: DateTime<Utc>,
        source_sequence: Option<String>,
    ) -> Result<Self> {
        Self::new(latitude, longitude, timestamp_utc, source_sequence).validate()
    }

    /// Check the coordinate invariant, passing the fix through when it holds
    pub fn validate(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(RelayError::InvalidFix {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }

    /// Whether both coordinates are in range
    pub fn is_valid(&self) -> bool {
        LATITUDE_RANGE.contains(&self.latitude) && LONGITUDE_RANGE.contains(&self.longitude)
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn timestamp_utc(&self) -> DateTime<Utc> {
        self.timestamp_utc
    }

    pub fn source_sequence(&self) -> Option<&str> {
        self.source_sequence.as_deref()
    }
}
