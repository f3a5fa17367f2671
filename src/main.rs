//! # SAR Relay
//!
//! Relay a Skydio drone's live position to CalTopo location tracking.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load and validate configuration (fatal on error)
//!    - Set up logging
//!    - Resolve the call sign once (fatal on error)
//!    - Build the Skydio and CalTopo HTTP clients
//!
//! 2. **Main Loop**
//!    - Relay loop polls at the configured interval and backs off on failures
//!    - Status reporter logs a health line periodically
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C or SIGTERM cancels both tasks
//!    - Exit code 0
//!
//! Expected output:
//! ```text
//! INFO sar_relay: SAR Relay v0.1.0 starting...
//! INFO sar_relay: Relaying as call sign CITY_SAR-x8a8
//! INFO sar_relay::relay: Relay loop started call_sign=CITY_SAR-x8a8 ...
//! INFO sar_relay::relay: Position relayed call_sign=CITY_SAR-x8a8 lat=36.47375 lon=-118.85302 status=200
//! ```

use std::future::Future;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sar_relay::callsign;
use sar_relay::config::Config;
use sar_relay::downstream::CalTopoClient;
use sar_relay::logging;
use sar_relay::relay::RelayLoop;
use sar_relay::status::run_status_reporter;
use sar_relay::upstream::SkydioClient;

/// Relay a drone's live position to CalTopo
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Override the configured log level (RUST_LOG still wins)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    let _log_guard = logging::init(&config.logging).context("failed to initialize logging")?;

    info!("SAR Relay v{} starting...", env!("CARGO_PKG_VERSION"));

    let call_sign =
        callsign::resolve(&config.downstream.connect_key, &config.upstream.vehicle_serial)
            .context("invalid call sign configuration")?;
    info!("Relaying as call sign {}", call_sign);

    let source = SkydioClient::new(
        &config.upstream.base_url,
        &config.upstream.api_token,
        config.upstream_timeout(),
    )
    .context("failed to build Skydio client")?;
    let sink = CalTopoClient::new(&config.downstream.base_url, config.downstream_timeout())
        .context("failed to build CalTopo client")?;

    source.check_connection(&config.upstream.vehicle_serial).await;

    let relay = RelayLoop::new(
        source,
        sink,
        config.upstream.vehicle_serial.clone(),
        call_sign.clone(),
        config.relay_settings(),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(shutdown.clone()));

    let reporter = tokio::spawn(run_status_reporter(
        relay.reporter(),
        call_sign,
        config.status_interval(),
        shutdown.clone(),
    ));

    info!("Press Ctrl+C to exit");
    relay.run(shutdown).await;
    reporter.await.context("status reporter task failed")?;

    let snapshot = relay.reporter().snapshot();
    info!(
        consecutive_failures = snapshot.consecutive_failure_count,
        last_success = ?snapshot.last_success_at,
        "Shut down cleanly"
    );

    Ok(())
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
///
/// If no signal handler can be installed the relay keeps running.
async fn wait_for_shutdown(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    true = signal_received(tokio::signal::ctrl_c(), "Ctrl+C") => {}
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!(error = %e, "Unable to listen for SIGTERM");
                if !signal_received(tokio::signal::ctrl_c(), "Ctrl+C").await {
                    return;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if !signal_received(tokio::signal::ctrl_c(), "Ctrl+C").await {
            return;
        }
    }

    shutdown.cancel();
}

/// Await a signal listener; `false` if the listener could not be installed
async fn signal_received<F>(signal: F, name: &str) -> bool
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Received {}, shutting down...", name);
            true
        }
        Err(e) => {
            warn!(error = %e, "Unable to listen for {}", name);
            false
        }
    }
}
