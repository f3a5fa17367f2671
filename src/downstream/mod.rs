//! # Downstream Tracker Module
//!
//! Forwards position fixes to the location-tracking service.
//!
//! Reports are unauthenticated: the call sign is the only identity. Delivery is
//! at-least-once; a duplicate report just adds another track point.

use async_trait::async_trait;

use crate::callsign::CallSign;
use crate::error::Result;
use crate::telemetry::PositionFix;

pub mod client;

pub use client::CalTopoClient;

/// Acknowledgement of an accepted position report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// HTTP status returned by the tracker
    pub status: u16,
}

/// Sink accepting position reports addressed by call sign
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackerSink: Send + Sync {
    /// Post one fix
    ///
    /// Fails with `SinkUnavailable` on network errors and `SinkRejected` when
    /// the tracker refuses the payload.
    async fn post_fix(&self, call_sign: &CallSign, fix: &PositionFix) -> Result<Ack>;
}
