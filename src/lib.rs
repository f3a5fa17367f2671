//! # SAR Relay Library
//!
//! Relay a drone's live position from the Skydio cloud API to CalTopo location
//! tracking.
//!
//! This library provides the poll-transform-relay engine: it polls vehicle status
//! and telemetry on a fixed interval, normalizes the position fix and forwards it
//! under a fixed call sign, backing off on failures without ever giving up.

pub mod callsign;
pub mod config;
pub mod downstream;
pub mod error;
pub mod logging;
pub mod relay;
pub mod status;
pub mod telemetry;
pub mod upstream;
