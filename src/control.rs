//! # Control Loop
//!
//! One tick, in order:
//!
//! 1. Read the gamepad sample and map it to a human command
//! 2. Sample the emergency stop (polled strategy only)
//! 3. Arbitrate between stop, autopilot and human input
//! 4. Actuate the motors
//!
//! Nothing inside a tick suspends. The caller owns the schedule and may stop
//! calling `tick` at any point; [`ControlLoop::shutdown`] (or drop) leaves
//! the motors neutral.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::autopilot::AutopilotLink;
use crate::command::{DriveMode, MotorCommand};
use crate::config::{ControlConfig, StopStrategy};
use crate::controller::input::{HumanInput, InputMapper};
use crate::controller::SampleSource;
use crate::drive::{Arbitration, DifferentialActuator, DriveArbiter};
use crate::error::Result;
use crate::safety::{EmergencyStopMonitor, StopEvent, StopState, StopStatus, StopWatcher};

/// How the emergency stop is sampled.
#[derive(Debug)]
pub enum StopDriver {
    /// Sampled once per tick.
    Polled(EmergencyStopMonitor),
    /// Sampled on pin edges by a watcher thread.
    Interrupt(StopWatcher),
}

/// Everything one tick decided.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub input: HumanInput,
    pub stop: StopStatus,
    /// Stop transition seen by this tick's sample (polled strategy only).
    pub stop_event: Option<StopEvent>,
    pub mode: DriveMode,
    pub arbitration: Arbitration,
    /// `(left, right)` as applied.
    pub motors: (MotorCommand, MotorCommand),
}

pub struct ControlLoop {
    source: Box<dyn SampleSource + Send>,
    mapper: InputMapper,
    stop: StopDriver,
    stop_state: Arc<StopState>,
    arbiter: DriveArbiter,
    actuator: DifferentialActuator,
    autopilot: Option<AutopilotLink>,
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("stop", &self.stop)
            .field("arbiter", &self.arbiter)
            .field("actuator", &self.actuator)
            .finish_non_exhaustive()
    }
}

impl ControlLoop {
    /// Assembles the loop. With the interrupt strategy the monitor is moved
    /// onto its watcher thread here.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the watcher thread cannot be started.
    pub fn new(
        config: &ControlConfig,
        source: Box<dyn SampleSource + Send>,
        monitor: EmergencyStopMonitor,
        actuator: DifferentialActuator,
        autopilot: Option<AutopilotLink>,
    ) -> Result<Self> {
        let stop_state = monitor.state();
        let stop = match config.emergency.strategy {
            StopStrategy::Polled => StopDriver::Polled(monitor),
            StopStrategy::Interrupt if monitor.is_degraded() => {
                debug!("Emergency stop degraded, no watcher thread");
                StopDriver::Polled(monitor)
            }
            StopStrategy::Interrupt => {
                info!("Emergency stop sampled by watcher thread");
                StopDriver::Interrupt(monitor.spawn_watcher()?)
            }
        };

        Ok(Self {
            source,
            mapper: InputMapper::new(&config.input),
            stop,
            stop_state,
            arbiter: DriveArbiter::new(config.drive.autopilot_timeout()),
            actuator,
            autopilot,
        })
    }

    /// Runs one control cycle.
    ///
    /// # Errors
    ///
    /// Propagates actuation faults; see [`DifferentialActuator::actuate`].
    pub fn tick(&mut self, now: Instant) -> Result<TickReport> {
        let input = self.mapper.map(self.source.read_sample(now));

        let stop_event = match &mut self.stop {
            StopDriver::Polled(monitor) => monitor.sample(now),
            StopDriver::Interrupt(_) => None,
        };
        let stop = self.stop_state.status();

        let autonomous = self.autopilot.as_ref().and_then(AutopilotLink::latest);
        let arbitration = self.arbiter.arbitrate(&input, autonomous.as_ref(), &stop, now);
        let motors = self.actuator.actuate(&arbitration)?;

        Ok(TickReport {
            input,
            stop,
            stop_event,
            mode: self.arbiter.mode(),
            arbitration,
            motors,
        })
    }

    /// Replaces the input source, e.g. after a gamepad reconnect.
    pub fn set_source(&mut self, source: Box<dyn SampleSource + Send>) {
        self.source = source;
    }

    /// Shared stop status for observers.
    #[must_use]
    pub fn stop_state(&self) -> Arc<StopState> {
        Arc::clone(&self.stop_state)
    }

    /// The polled monitor, for manual trigger and reset.
    pub fn monitor_mut(&mut self) -> Option<&mut EmergencyStopMonitor> {
        match &mut self.stop {
            StopDriver::Polled(monitor) => Some(monitor),
            StopDriver::Interrupt(_) => None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> DriveMode {
        self.arbiter.mode()
    }

    /// Requests a drive mode for the next tick.
    pub fn request_mode(&mut self, mode: DriveMode) {
        self.arbiter.request_mode(mode);
    }

    /// Drives the motors neutral and stops the watcher thread.
    ///
    /// # Errors
    ///
    /// Returns `Gpio` if a neutral write failed.
    pub fn shutdown(mut self) -> Result<()> {
        let result = self.actuator.shutdown();
        if let StopDriver::Interrupt(watcher) = self.stop {
            watcher.stop();
        }
        result
    }
}
