//! # Tracked Drive
//!
//! Drives a two-track vehicle from a gamepad or an autopilot on stdin, with
//! a hardware emergency stop.
//!
//! Usage: `tracked-drive [CONFIG_PATH]` (default `config/default.toml`).

use std::time::Instant;

use anyhow::{Context, Result};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use tracked_drive::autopilot::{self, read_json_lines, AutopilotLink};
use tracked_drive::config::{AutopilotSource, ControlConfig, InputConfig, LoggingConfig};
use tracked_drive::control::ControlLoop;
use tracked_drive::controller::gamepad::Gamepad;
use tracked_drive::controller::mapper::AxisRange;
use tracked_drive::controller::{Disconnected, InputFault, SampleSource};
use tracked_drive::drive::DifferentialActuator;
use tracked_drive::gpio::{self, BackendKind};
use tracked_drive::safety::EmergencyStopMonitor;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// How often the status line (and any degraded-safety warning) is logged.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Installs the console layer and, if configured, a daily-rolling file layer.
///
/// `RUST_LOG` overrides the configured level. The returned guard must live
/// until exit so buffered file output is flushed.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer());

    match &config.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tracked-drive.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

fn axis_range(config: &InputConfig) -> AxisRange {
    AxisRange {
        min: config.axis_min,
        max: config.axis_max,
        invert_y: config.invert_throttle,
    }
}

/// Opens the gamepad and starts its reader task.
fn connect_gamepad(config: &InputConfig) -> tracked_drive::error::Result<Box<dyn SampleSource + Send>> {
    let gamepad = Gamepad::open(&config.device_path)?;
    let source = gamepad.spawn_reader(axis_range(config), config.read_timeout())?;
    Ok(Box::new(source))
}

fn start_autopilot(config: &ControlConfig) -> Option<AutopilotLink> {
    match config.autopilot.source {
        AutopilotSource::None => None,
        AutopilotSource::Stdin => {
            let (publisher, link) = autopilot::channel();
            tokio::spawn(async move {
                match read_json_lines(tokio::io::stdin(), publisher).await {
                    Ok(count) => debug!("Autopilot reader finished ({} commands)", count),
                    Err(e) => warn!("Autopilot reader failed: {}", e),
                }
            });
            info!("Autopilot commands read from stdin");
            Some(link)
        }
    }
}

/// Main entry point for Tracked Drive
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load and validate configuration
///    - Set up logging
///    - Open GPIO, claim the emergency stop and motor pins
///    - Connect the gamepad (or start without one) and the autopilot link
///
/// 2. **Main Loop**
///    - Run one control tick at `control_rate_hz`
///    - Reconnect the gamepad every `reconnect_interval_ms` while it is gone
///    - Log status, and re-announce a degraded safety monitor, every 10 s
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Shutdown**
///    - Drive both motors neutral and release all pins
///
/// # Errors
///
/// Returns error if:
/// - The configuration cannot be loaded
/// - The motor pins cannot be claimed
/// - Actuation keeps failing (motors are stopped first)
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = ControlConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);
    info!("Tracked Drive v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path);

    let mut backend =
        gpio::open_backend(config.hardware.backend).context("Failed to open GPIO backend")?;
    info!("GPIO backend: {}", backend.name());

    // Simulated pins have no physical button behind them
    let monitor = if config.hardware.backend == BackendKind::Simulated {
        EmergencyStopMonitor::open(None, &config.emergency)
    } else {
        EmergencyStopMonitor::open(Some(backend.as_mut()), &config.emergency)
    };

    let actuator = DifferentialActuator::from_config(backend.as_mut(), &config)
        .context("Failed to claim motor pins")?;

    let source = match connect_gamepad(&config.input) {
        Ok(source) => source,
        Err(e) => {
            warn!("No gamepad yet ({}), driving neutral until one connects", e);
            Box::new(Disconnected)
        }
    };

    let autopilot = start_autopilot(&config);
    let mut control = ControlLoop::new(&config, source, monitor, actuator, autopilot)?;
    let stop_state = control.stop_state();

    let reconnect_interval = Duration::from_millis(config.input.reconnect_interval_ms);
    let mut last_reconnect = Instant::now();
    let mut last_status = Instant::now();
    let mut ticks: u64 = 0;
    let mut failure = None;

    let mut ticker = interval(config.drive.tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Starting control loop at {}Hz",
        config.drive.control_rate_hz
    );
    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                match control.tick(now) {
                    Ok(report) => {
                        ticks += 1;
                        if report.input.fault == Some(InputFault::Disconnected)
                            && now.duration_since(last_reconnect) >= reconnect_interval
                        {
                            last_reconnect = now;
                            match connect_gamepad(&config.input) {
                                Ok(source) => {
                                    info!("Gamepad connected");
                                    control.set_source(source);
                                }
                                Err(e) => debug!("Gamepad reconnect failed: {}", e),
                            }
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        error!("Fatal actuation failure: {}", e);
                        failure = Some(e);
                        break;
                    }
                    Err(e) => warn!("Tick failed: {}", e),
                }

                if now.duration_since(last_status) >= STATUS_LOG_INTERVAL {
                    last_status = now;
                    let status = stop_state.status();
                    if status.degraded {
                        error!("Hardware emergency stop UNAVAILABLE: only the gamepad stop button works");
                    }
                    info!(
                        "{} ticks, mode {}, e-stop {}",
                        ticks,
                        control.mode(),
                        status.phase
                    );
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    control.shutdown().context("Failed to stop motors")?;
    info!("Total ticks: {}", ticks);

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        assert_eq!(DEFAULT_CONFIG_PATH, "config/default.toml");
    }

    #[test]
    fn test_axis_range_from_config() {
        let config = InputConfig {
            axis_min: -32768,
            axis_max: 32767,
            invert_throttle: false,
            ..InputConfig::default()
        };
        let range = axis_range(&config);
        assert_eq!(range.min, -32768);
        assert_eq!(range.max, 32767);
        assert!(!range.invert_y);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = ControlConfig::from_toml(include_str!("../config/default.toml")).unwrap();
        assert_eq!(config.hardware.backend, BackendKind::Rpi);
        assert_eq!(config.autopilot.source, AutopilotSource::None);
    }

    #[tokio::test]
    async fn test_autopilot_disabled_by_default() {
        assert!(start_autopilot(&ControlConfig::default()).is_none());
    }
}
