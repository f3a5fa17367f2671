//! # Upstream Telemetry Module
//!
//! Fetches vehicle status and live position from the drone-fleet cloud API.
//!
//! This module handles:
//! - The [`TelemetrySource`] seam the relay loop polls
//! - The Skydio HTTP client implementing it
//! - Normalizing raw payloads into [`PositionFix`] / [`VehicleStatus`]

use async_trait::async_trait;

use crate::error::Result;
use crate::telemetry::{PositionFix, VehicleStatus};

pub mod client;
pub mod extract;

pub use client::SkydioClient;

/// Source of vehicle status and position fixes
///
/// Implementations are read-only with respect to the vehicle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Fetch connectivity and battery state
    ///
    /// Succeeds with `connected == false` when the vehicle is powered off.
    async fn fetch_status(&self, vehicle_id: &str) -> Result<VehicleStatus>;

    /// Fetch the latest position fix
    ///
    /// Fails with `SourceNoFix` when the vehicle has no position yet.
    async fn fetch_telemetry(&self, vehicle_id: &str) -> Result<PositionFix>;
}
