//! # Relay Loop
//!
//! The poll-transform-relay engine.
//!
//! Each tick runs one cycle: fetch status, fetch telemetry, validate the fix, post
//! it downstream. Cycles follow `Idle → Polling → Posting → Idle`; any failure
//! moves to `Backoff` for a bounded exponential delay and then back to `Idle`.
//!
//! ```text
//!            tick                 valid fix            ack
//!   Idle ──────────▶ Polling ──────────────▶ Posting ──────▶ Idle
//!    ▲                 │  no fix / offline      │
//!    │                 └──────────▶ Idle        │
//!    │   delay elapsed         failure          │ failure
//!    └──────────────── Backoff ◀────────────────┘
//! ```
//!
//! The loop never stops on its own; it only exits when the shutdown token is
//! cancelled, which is honored while waiting for a tick, during an in-flight
//! request and during backoff.

use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callsign::CallSign;
use crate::downstream::TrackerSink;
use crate::error::RelayError;
use crate::status::StatusReporter;
use crate::telemetry::{PositionFix, VehicleStatus};
use crate::upstream::TelemetrySource;

pub mod backoff;
pub mod state;

pub use backoff::BackoffPolicy;
pub use state::{Phase, RelayState, RelayStateWriter};

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Relay loop timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    pub poll_interval: Duration,
    pub max_backoff: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_backoff: backoff::DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Result of one cycle
#[derive(Debug)]
pub enum CycleOutcome {
    /// Fix posted and acknowledged
    Relayed(PositionFix),
    /// Vehicle online but without a position yet
    NoFix,
    /// Vehicle powered off or not connected to the cloud
    VehicleOffline(VehicleStatus),
    /// Another cycle was already in flight
    Skipped,
    /// Cycle failed; the loop sleeps `backoff` before the next one
    Failed {
        error: RelayError,
        consecutive_failures: u32,
        backoff: Duration,
    },
}

/// Poll-transform-relay engine for one vehicle
pub struct RelayLoop<S, K> {
    source: S,
    sink: K,
    vehicle_id: String,
    call_sign: CallSign,
    backoff: BackoffPolicy,
    settings: RelaySettings,
    state: RelayStateWriter,
}

impl<S: TelemetrySource, K: TrackerSink> RelayLoop<S, K> {
    /// Create a relay for one vehicle
    ///
    /// The call sign must already be resolved; it is never recomputed.
    pub fn new(
        source: S,
        sink: K,
        vehicle_id: impl Into<String>,
        call_sign: CallSign,
        settings: RelaySettings,
    ) -> Self {
        Self {
            source,
            sink,
            vehicle_id: vehicle_id.into(),
            call_sign,
            backoff: BackoffPolicy::new(settings.poll_interval, settings.max_backoff),
            settings,
            state: RelayStateWriter::new(),
        }
    }

    /// Read-only view of this relay's health
    pub fn reporter(&self) -> StatusReporter {
        StatusReporter::new(self.state.shared())
    }

    pub fn call_sign(&self) -> &CallSign {
        &self.call_sign
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            call_sign = %self.call_sign,
            vehicle = %self.vehicle_id,
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            max_backoff_secs = self.backoff.max().as_secs(),
            "Relay loop started"
        );

        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.run_cycle() => outcome,
            };

            if let CycleOutcome::Failed { backoff, .. } = outcome {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(backoff) => {}
                }
                self.state.set_phase(Phase::Idle);
                ticker.reset_immediately();
            }
        }

        self.state.set_phase(Phase::Idle);
        info!(call_sign = %self.call_sign, "Relay loop stopped");
    }

    /// Run one fetch-then-forward cycle
    ///
    /// Returns `Skipped` without side effects if a cycle is already in flight.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if !self.state.begin_cycle() {
            debug!("Cycle already in flight, skipping tick");
            return CycleOutcome::Skipped;
        }

        let status = match self.source.fetch_status(&self.vehicle_id).await {
            Ok(status) => status,
            Err(e) => return self.fail_with(e, true),
        };
        let connected = status.connected;
        self.state.record_status(status.clone());

        if !connected {
            debug!(vehicle = %self.vehicle_id, "Vehicle offline, nothing to relay");
            self.state.finish_quiet();
            return CycleOutcome::VehicleOffline(status);
        }

        let fix = match self.source.fetch_telemetry(&self.vehicle_id).await {
            Ok(fix) => fix,
            Err(e) if e.is_quiet() => {
                debug!(vehicle = %self.vehicle_id, "Vehicle connected without position fix");
                self.state.finish_quiet();
                return CycleOutcome::NoFix;
            }
            Err(e) => return self.fail(e),
        };

        let fix = match fix.validate() {
            Ok(fix) => fix,
            Err(e) => return self.fail(e),
        };

        self.state.set_phase(Phase::Posting);
        match self.sink.post_fix(&self.call_sign, &fix).await {
            Ok(ack) => {
                info!(
                    call_sign = %self.call_sign,
                    lat = fix.latitude(),
                    lon = fix.longitude(),
                    status = ack.status,
                    "Position relayed"
                );
                self.state.record_success(fix.clone(), Utc::now());
                CycleOutcome::Relayed(fix)
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&self, error: RelayError) -> CycleOutcome {
        self.fail_with(error, false)
    }

    /// Record a failure; `status_lost` drops the last vehicle status as stale
    fn fail_with(&self, error: RelayError, status_lost: bool) -> CycleOutcome {
        let kind = error.failure_kind();
        let consecutive_failures = if status_lost {
            self.state.record_status_failure(kind)
        } else {
            self.state.record_failure(kind)
        };
        let backoff = self.backoff.delay(consecutive_failures);

        warn!(
            call_sign = %self.call_sign,
            error = %error,
            failure = %kind,
            consecutive_failures,
            backoff_secs = backoff.as_secs(),
            "Relay cycle failed"
        );

        CycleOutcome::Failed {
            error,
            consecutive_failures,
            backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callsign::resolve;
    use crate::downstream::{Ack, MockTrackerSink};
    use crate::error::{FailureKind, Result};
    use crate::upstream::MockTelemetrySource;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    const SERIAL: &str = "SkydioX10-x8a8";

    fn online() -> VehicleStatus {
        VehicleStatus {
            serial: SERIAL.to_string(),
            connected: true,
            battery_percent: Some(80.0),
            ..Default::default()
        }
    }

    fn fix(lat: f64, lon: f64) -> PositionFix {
        PositionFix::new(lat, lon, Utc::now(), None)
    }

    fn settings() -> RelaySettings {
        RelaySettings {
            poll_interval: Duration::from_secs(10),
            max_backoff: Duration::from_secs(300),
        }
    }

    fn relay<S: TelemetrySource, K: TrackerSink>(source: S, sink: K) -> RelayLoop<S, K> {
        let call_sign = resolve("CITY_SAR", SERIAL).unwrap();
        RelayLoop::new(source, sink, SERIAL, call_sign, settings())
    }

    /// Source that replays scripted telemetry results, then reports no fix
    #[derive(Clone, Default)]
    struct ScriptedSource {
        telemetry: Arc<Mutex<VecDeque<Result<PositionFix>>>>,
        calls: Arc<Mutex<usize>>,
        yield_first: bool,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<PositionFix>>) -> Self {
            Self {
                telemetry: Arc::new(Mutex::new(script.into())),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl TelemetrySource for ScriptedSource {
        async fn fetch_status(&self, _vehicle_id: &str) -> Result<VehicleStatus> {
            if self.yield_first {
                tokio::task::yield_now().await;
            }
            Ok(online())
        }

        async fn fetch_telemetry(&self, _vehicle_id: &str) -> Result<PositionFix> {
            *self.calls.lock().unwrap() += 1;
            self.telemetry
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(RelayError::SourceNoFix))
        }
    }

    /// Sink that records every posted fix and when it arrived
    #[derive(Clone, Default)]
    struct RecordingSink {
        posted: Arc<Mutex<Vec<PositionFix>>>,
        posted_at: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl TrackerSink for RecordingSink {
        async fn post_fix(&self, _call_sign: &CallSign, fix: &PositionFix) -> Result<Ack> {
            self.posted.lock().unwrap().push(fix.clone());
            self.posted_at.lock().unwrap().push(Instant::now());
            Ok(Ack { status: 200 })
        }
    }

    /// Source whose first status call takes `first_latency`; later calls are instant
    #[derive(Clone)]
    struct SlowStartSource {
        first_latency: Duration,
        started_at: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl TelemetrySource for SlowStartSource {
        async fn fetch_status(&self, _vehicle_id: &str) -> Result<VehicleStatus> {
            let first = {
                let mut started_at = self.started_at.lock().unwrap();
                started_at.push(Instant::now());
                started_at.len() == 1
            };
            if first {
                sleep(self.first_latency).await;
            }
            Ok(VehicleStatus::offline(SERIAL))
        }

        async fn fetch_telemetry(&self, _vehicle_id: &str) -> Result<PositionFix> {
            Err(RelayError::SourceNoFix)
        }
    }

    #[tokio::test]
    async fn test_successful_cycle_sets_last_fix() {
        let expected = fix(36.47375, -118.85302);
        let source = ScriptedSource::new(vec![Ok(expected.clone())]);
        let sink = RecordingSink::default();
        let relay = relay(source, sink.clone());

        match relay.run_cycle().await {
            CycleOutcome::Relayed(f) => assert_eq!(f, expected),
            other => panic!("Expected Relayed, got: {:?}", other),
        }

        let snapshot = relay.reporter().snapshot();
        assert_eq!(snapshot.last_fix, Some(expected.clone()));
        assert_eq!(snapshot.consecutive_failure_count, 0);
        assert!(snapshot.last_success_at.is_some());
        assert_eq!(snapshot.phase, Phase::Idle);
        assert_eq!(*sink.posted.lock().unwrap(), vec![expected]);
    }

    #[tokio::test]
    async fn test_out_of_range_fix_is_failure_and_not_posted() {
        let source = ScriptedSource::new(vec![Ok(fix(95.0, 10.0))]);
        let mut sink = MockTrackerSink::new();
        sink.expect_post_fix().never();
        let relay = relay(source, sink);

        match relay.run_cycle().await {
            CycleOutcome::Failed {
                error: RelayError::InvalidFix { .. },
                consecutive_failures: 1,
                ..
            } => {}
            other => panic!("Expected InvalidFix failure, got: {:?}", other),
        }

        let snapshot = relay.reporter().snapshot();
        assert!(snapshot.last_fix.is_none());
        assert_eq!(snapshot.last_failure, Some(FailureKind::InvalidFix));
        assert_eq!(snapshot.phase, Phase::Backoff);
    }

    #[tokio::test]
    async fn test_no_fix_does_not_count_as_failure() {
        let source = ScriptedSource::new(vec![
            Err(RelayError::SourceUnavailable("timeout".into())),
            Err(RelayError::SourceNoFix),
        ]);
        let mut sink = MockTrackerSink::new();
        sink.expect_post_fix().never();
        let relay = relay(source, sink);

        assert!(matches!(relay.run_cycle().await, CycleOutcome::Failed { .. }));
        relay.state.set_phase(Phase::Idle);
        assert_eq!(relay.reporter().snapshot().consecutive_failure_count, 1);

        assert!(matches!(relay.run_cycle().await, CycleOutcome::NoFix));
        let snapshot = relay.reporter().snapshot();
        assert_eq!(snapshot.consecutive_failure_count, 1);
        assert_eq!(snapshot.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_offline_vehicle_ends_cycle_quietly() {
        let mut source = MockTelemetrySource::new();
        source
            .expect_fetch_status()
            .returning(|_| Ok(VehicleStatus::offline(SERIAL)));
        source.expect_fetch_telemetry().never();
        let mut sink = MockTrackerSink::new();
        sink.expect_post_fix().never();
        let relay = relay(source, sink);

        assert!(matches!(
            relay.run_cycle().await,
            CycleOutcome::VehicleOffline(_)
        ));
        let snapshot = relay.reporter().snapshot();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.consecutive_failure_count, 0);
    }

    #[tokio::test]
    async fn test_auth_error_backs_off_and_is_surfaced() {
        let mut source = MockTelemetrySource::new();
        source
            .expect_fetch_status()
            .returning(|_| Err(RelayError::SourceAuthError("HTTP 401".into())));
        let relay = relay(source, MockTrackerSink::new());

        match relay.run_cycle().await {
            CycleOutcome::Failed { backoff, .. } => assert_eq!(backoff, Duration::from_secs(10)),
            other => panic!("Expected failure, got: {:?}", other),
        }
        assert_eq!(
            relay.reporter().snapshot().last_failure,
            Some(FailureKind::Auth)
        );
    }

    #[tokio::test]
    async fn test_status_failure_marks_status_unknown() {
        let mut source = MockTelemetrySource::new();
        let mut calls = 0;
        source.expect_fetch_status().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(VehicleStatus::offline(SERIAL))
            } else {
                Err(RelayError::SourceUnavailable("HTTP 502".into()))
            }
        });
        source.expect_fetch_telemetry().never();
        let relay = relay(source, MockTrackerSink::new());

        assert!(matches!(relay.run_cycle().await, CycleOutcome::VehicleOffline(_)));
        assert!(relay.reporter().snapshot().status_known);

        assert!(matches!(relay.run_cycle().await, CycleOutcome::Failed { .. }));
        let snapshot = relay.reporter().snapshot();
        assert!(!snapshot.status_known);
        assert!(!snapshot.connected);
        assert_eq!(snapshot.consecutive_failure_count, 1);
    }

    #[tokio::test]
    async fn test_sink_rejection_counts_as_failure() {
        let source = ScriptedSource::new(vec![Ok(fix(1.0, 2.0))]);
        let mut sink = MockTrackerSink::new();
        sink.expect_post_fix().times(1).returning(|_, _| {
            Err(RelayError::SinkRejected {
                status: 400,
                body: "bad".into(),
            })
        });
        let relay = relay(source, sink);

        assert!(matches!(
            relay.run_cycle().await,
            CycleOutcome::Failed {
                error: RelayError::SinkRejected { .. },
                ..
            }
        ));
        let snapshot = relay.reporter().snapshot();
        assert!(snapshot.last_fix.is_none());
        assert_eq!(snapshot.last_failure, Some(FailureKind::SinkRejected));
    }

    #[tokio::test]
    async fn test_concurrent_cycle_is_skipped() {
        let mut source = ScriptedSource::new(vec![Ok(fix(1.0, 2.0))]);
        source.yield_first = true;
        let sink = RecordingSink::default();
        let relay = relay(source, sink.clone());

        let (first, second) = tokio::join!(relay.run_cycle(), relay.run_cycle());
        assert!(matches!(first, CycleOutcome::Relayed(_)));
        assert!(matches!(second, CycleOutcome::Skipped));
        assert_eq!(sink.posted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_outage_and_recovery_scenario() {
        let timeout = || Err(RelayError::SourceUnavailable("request timed out".into()));
        let first = fix(36.0, -118.0);
        let recovered = fix(36.1, -118.1);
        let source = ScriptedSource::new(vec![
            Ok(first.clone()),
            timeout(),
            timeout(),
            timeout(),
            Ok(recovered.clone()),
        ]);
        let relay = relay(source, RecordingSink::default());

        // Cycle 1: success
        assert!(matches!(relay.run_cycle().await, CycleOutcome::Relayed(_)));
        let after_first = relay.reporter().snapshot();
        assert_eq!(after_first.consecutive_failure_count, 0);
        let first_success_at = after_first.last_success_at.unwrap();

        // Cycles 2-4: timeouts with growing backoff
        let mut previous_backoff = Duration::ZERO;
        for expected_count in 1..=3 {
            match relay.run_cycle().await {
                CycleOutcome::Failed {
                    consecutive_failures,
                    backoff,
                    ..
                } => {
                    assert_eq!(consecutive_failures, expected_count);
                    assert!(backoff > previous_backoff);
                    previous_backoff = backoff;
                }
                other => panic!("Expected failure, got: {:?}", other),
            }
            let snapshot = relay.reporter().snapshot();
            assert_eq!(snapshot.consecutive_failure_count, expected_count);
            assert_eq!(snapshot.last_fix, Some(first.clone()));
            relay.state.set_phase(Phase::Idle);
        }

        // Cycle 5: recovery
        assert!(matches!(relay.run_cycle().await, CycleOutcome::Relayed(_)));
        let snapshot = relay.reporter().snapshot();
        assert_eq!(snapshot.consecutive_failure_count, 0);
        assert_eq!(snapshot.last_fix, Some(recovered));
        assert!(snapshot.last_success_at.unwrap() >= first_success_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff() {
        let mut source = MockTelemetrySource::new();
        source
            .expect_fetch_status()
            .returning(|_| Err(RelayError::SourceUnavailable("connection refused".into())));
        let relay = Arc::new(relay(source, MockTrackerSink::new()));
        let reporter = relay.reporter();
        let shutdown = CancellationToken::new();

        let handle = {
            let relay = Arc::clone(&relay);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { relay.run(shutdown).await })
        };

        while reporter.snapshot().phase != Phase::Backoff {
            sleep(Duration::from_millis(10)).await;
        }

        shutdown.cancel();
        // Backoff is 10s; the loop must exit well before it elapses
        let joined = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(joined.is_ok(), "relay did not stop during backoff");
        assert_eq!(reporter.snapshot().consecutive_failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_keeps_retrying_after_failures() {
        let source = ScriptedSource::new(vec![
            Err(RelayError::SourceUnavailable("timeout".into())),
            Err(RelayError::SourceUnavailable("timeout".into())),
            Ok(fix(5.0, 6.0)),
        ]);
        let sink = RecordingSink::default();
        let relay = Arc::new(relay(source.clone(), sink.clone()));
        let shutdown = CancellationToken::new();

        let handle = {
            let relay = Arc::clone(&relay);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { relay.run(shutdown).await })
        };

        // 10s + 20s backoff, then the recovering cycle
        while sink.posted.lock().unwrap().is_empty() {
            sleep(Duration::from_secs(1)).await;
        }

        shutdown.cancel();
        handle.await.unwrap();
        assert!(source.calls() >= 3);
        let snapshot = relay.reporter().snapshot();
        assert_eq!(snapshot.consecutive_failure_count, 0);
        assert_eq!(snapshot.phase, Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_full_backoff_before_retrying() {
        let source = ScriptedSource::new(vec![
            Err(RelayError::SourceUnavailable("timeout".into())),
            Err(RelayError::SourceUnavailable("timeout".into())),
            Ok(fix(5.0, 6.0)),
        ]);
        let sink = RecordingSink::default();
        let relay = Arc::new(relay(source, sink.clone()));
        let shutdown = CancellationToken::new();
        let started = Instant::now();

        let handle = {
            let relay = Arc::clone(&relay);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { relay.run(shutdown).await })
        };

        while sink.posted_at.lock().unwrap().is_empty() {
            sleep(Duration::from_millis(100)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        // Failures at t=0 and t=10s back off 10s then 20s
        let elapsed = sink.posted_at.lock().unwrap()[0] - started;
        assert!(
            elapsed >= Duration::from_secs(30),
            "recovery posted after {:?}, before the backoff elapsed",
            elapsed
        );
        assert!(elapsed < Duration::from_secs(31), "recovery posted after {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycle_skips_missed_ticks() {
        let started_at = Arc::new(Mutex::new(Vec::new()));
        let source = SlowStartSource {
            first_latency: Duration::from_secs(25),
            started_at: Arc::clone(&started_at),
        };
        let relay = Arc::new(relay(source, MockTrackerSink::new()));
        let shutdown = CancellationToken::new();
        let started = Instant::now();

        let handle = {
            let relay = Arc::clone(&relay);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { relay.run(shutdown).await })
        };

        while started_at.lock().unwrap().len() < 4 {
            sleep(Duration::from_secs(1)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        // The 25s cycle misses the 10s and 20s ticks: one late tick fires at 25s,
        // then the schedule resumes at 30s without replaying the other missed tick
        let offsets: Vec<u64> = started_at
            .lock()
            .unwrap()
            .iter()
            .take(4)
            .map(|t| (*t - started).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 25, 30, 40]);
    }
}
