//! Relay health state.
//!
//! One [`RelayStateWriter`] is owned by the relay loop; any number of
//! [`StatusReporter`](crate::status::StatusReporter)s read clones of the whole
//! structure under the same lock, so a reader never sees half of a cycle's update.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::error::FailureKind;
use crate::telemetry::{PositionFix, VehicleStatus};

/// Relay loop phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Polling,
    Posting,
    Backoff,
}

impl Phase {
    /// Whether a cycle is in flight
    pub fn in_cycle(self) -> bool {
        matches!(self, Phase::Polling | Phase::Posting)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::Polling => "polling",
            Phase::Posting => "posting",
            Phase::Backoff => "backoff",
        };
        f.write_str(label)
    }
}

/// Process-wide relay state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayState {
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failure_count: u32,
    pub last_fix: Option<PositionFix>,
    pub phase: Phase,
    pub last_status: Option<VehicleStatus>,
    pub last_failure: Option<FailureKind>,
}

impl RelayState {
    fn enter_backoff(&mut self, kind: FailureKind) -> u32 {
        self.consecutive_failure_count = self.consecutive_failure_count.saturating_add(1);
        self.last_failure = Some(kind);
        self.phase = Phase::Backoff;
        self.consecutive_failure_count
    }
}

type SharedState = Arc<RwLock<RelayState>>;

/// Read a consistent copy of the state
pub(crate) fn read(shared: &SharedState) -> RelayState {
    shared
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Sole writer of the relay state
///
/// Not `Clone`: only the relay loop mutates state.
#[derive(Debug, Default)]
pub struct RelayStateWriter {
    shared: SharedState,
}

impl RelayStateWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for readers
    pub(crate) fn shared(&self) -> SharedState {
        Arc::clone(&self.shared)
    }

    pub fn snapshot(&self) -> RelayState {
        read(&self.shared)
    }

    fn update<R>(&self, f: impl FnOnce(&mut RelayState) -> R) -> R {
        let mut guard = self.shared.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    }

    /// Claim the in-flight slot
    ///
    /// Returns `false` (and changes nothing) if a cycle is already polling or posting.
    pub fn begin_cycle(&self) -> bool {
        self.update(|state| {
            if state.phase.in_cycle() {
                false
            } else {
                state.phase = Phase::Polling;
                true
            }
        })
    }

    pub fn set_phase(&self, phase: Phase) {
        self.update(|state| state.phase = phase);
    }

    pub fn record_status(&self, status: VehicleStatus) {
        self.update(|state| state.last_status = Some(status));
    }

    /// Cycle ended without a fix and without a failure
    pub fn finish_quiet(&self) {
        self.set_phase(Phase::Idle);
    }

    /// Fix acknowledged downstream
    pub fn record_success(&self, fix: PositionFix, at: DateTime<Utc>) {
        self.update(|state| {
            state.last_fix = Some(fix);
            state.last_success_at = Some(at);
            state.consecutive_failure_count = 0;
            state.last_failure = None;
            state.phase = Phase::Idle;
        });
    }

    /// Cycle failed; enters backoff and returns the new failure count
    pub fn record_failure(&self, kind: FailureKind) -> u32 {
        self.update(|state| state.enter_backoff(kind))
    }

    /// Status fetch failed; the last known status is dropped as stale
    pub fn record_status_failure(&self, kind: FailureKind) -> u32 {
        self.update(|state| {
            state.last_status = None;
            state.enter_backoff(kind)
        })
    }
}
