//! # Telemetry Module
//!
//! Normalized vehicle data shared by the source, the sink and the relay loop.
//!
//! This module handles:
//! - Position fixes with the coordinate-range invariant
//! - Vehicle connectivity and battery status

pub mod fix;
pub mod vehicle;

pub use fix::PositionFix;
pub use vehicle::VehicleStatus;
