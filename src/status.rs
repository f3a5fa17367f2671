//! # Status Reporter
//!
//! Read-only view of relay health for the operator.
//!
//! The operator's main health signal is the consecutive failure count next to
//! the time of the last successful relay: a growing count with a stale success
//! time means the drone is off or the credentials need attention.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::callsign::CallSign;
use crate::error::FailureKind;
use crate::relay::state::{self, Phase, RelayState};
use crate::telemetry::PositionFix;

/// Point-in-time health projection
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    /// Whether a current vehicle status is known; false before the first
    /// status and after a failed status fetch
    pub status_known: bool,
    pub connected: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failure_count: u32,
    pub last_fix: Option<PositionFix>,
    pub phase: Phase,
    pub battery_percent: Option<f64>,
    pub last_failure: Option<FailureKind>,
}

impl From<RelayState> for StatusSnapshot {
    fn from(state: RelayState) -> Self {
        let (connected, battery_percent) = state
            .last_status
            .as_ref()
            .map(|s| (s.connected, s.battery_percent))
            .unwrap_or((false, None));

        Self {
            status_known: state.last_status.is_some(),
            connected,
            last_success_at: state.last_success_at,
            consecutive_failure_count: state.consecutive_failure_count,
            last_fix: state.last_fix,
            phase: state.phase,
            battery_percent,
            last_failure: state.last_failure,
        }
    }
}

impl StatusSnapshot {
    /// Whether the latest failure was a credential rejection
    pub fn auth_failing(&self) -> bool {
        self.consecutive_failure_count > 0 && self.last_failure == Some(FailureKind::Auth)
    }

    /// Render the operator status line
    pub fn status_line(&self, call_sign: &CallSign, now: DateTime<Utc>) -> String {
        let connectivity = match (self.status_known, self.connected) {
            (false, _) => "unknown",
            (true, true) => "online",
            (true, false) => "offline",
        };

        let battery = self
            .battery_percent
            .map(|b| format!("{:.0}%", b))
            .unwrap_or_else(|| "--".to_string());

        let position = self
            .last_fix
            .as_ref()
            .map(|f| format!("{:.6}, {:.6}", f.latitude(), f.longitude()))
            .unwrap_or_else(|| "no fix".to_string());

        let last_ok = self
            .last_success_at
            .map(|t| format!("{}s ago", (now - t).num_seconds().max(0)))
            .unwrap_or_else(|| "never".to_string());

        let mut line = format!(
            "{} | {} | batt {} | {} | last ok {} | failures {}",
            call_sign, connectivity, battery, position, last_ok, self.consecutive_failure_count
        );

        if self.auth_failing() {
            line.push_str(" | CHECK API TOKEN");
        } else if let Some(kind) = self.last_failure {
            line.push_str(&format!(" | last error: {}", kind));
        }

        line
    }
}

/// Reader handle for relay health
///
/// Cheap to clone and safe to use from any task.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    shared: Arc<RwLock<RelayState>>,
}

impl StatusReporter {
    pub(crate) fn new(shared: Arc<RwLock<RelayState>>) -> Self {
        Self { shared }
    }

    /// Consistent snapshot of the whole relay state
    pub fn snapshot(&self) -> StatusSnapshot {
        state::read(&self.shared).into()
    }
}

/// Log the status line every `every` until shutdown
pub async fn run_status_reporter(
    reporter: StatusReporter,
    call_sign: CallSign,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately, before anything has been relayed
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = reporter.snapshot();
                let line = snapshot.status_line(&call_sign, Utc::now());
                if snapshot.auth_failing() {
                    warn!("{}", line);
                } else {
                    info!("{}", line);
                }
            }
        }
    }
}
