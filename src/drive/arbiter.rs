//! # Drive Arbiter
//!
//! Picks the one command that drives the motors this cycle.
//!
//! Priority, highest first:
//!
//! 1. Hardware emergency stop active: stop
//! 2. Software emergency stop latched: stop
//! 3. Autonomous mode with a fresh autopilot command: autopilot
//! 4. Otherwise: human command
//!
//! Mode switches requested during a cycle are applied at the start of the
//! next one, so no cycle mixes sources.
//!
//! The software stop is latched while the gamepad emergency button is down,
//! whether or not its press edge was seen. It clears once the button is
//! released and the human command is back at neutral.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::command::{CommandSource, DriveMode, NormalizedCommand, TimedCommand};
use crate::controller::input::HumanInput;
use crate::safety::StopStatus;

/// Why the arbiter commanded a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Hardware stop button latched.
    EmergencyStop,
    /// Gamepad emergency button.
    SoftwareStop,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EmergencyStop => write!(f, "emergency stop"),
            StopReason::SoftwareStop => write!(f, "software stop"),
        }
    }
}

/// Outcome of one arbitration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arbitration {
    Drive(NormalizedCommand),
    /// Neutral, applied without ramping.
    Stop(StopReason),
}

impl Arbitration {
    /// The command to actuate; neutral for a stop.
    #[must_use]
    pub fn command(&self) -> NormalizedCommand {
        match self {
            Arbitration::Drive(cmd) => *cmd,
            Arbitration::Stop(_) => NormalizedCommand::neutral(CommandSource::Human),
        }
    }

    #[must_use]
    pub fn is_stop(&self) -> bool {
        matches!(self, Arbitration::Stop(_))
    }
}

#[derive(Debug)]
pub struct DriveArbiter {
    mode: DriveMode,
    pending_mode: Option<DriveMode>,
    software_stop: bool,
    staleness: Duration,
    autopilot_stale: bool,
}

impl DriveArbiter {
    /// `staleness` bounds the age of a usable autopilot command.
    #[must_use]
    pub fn new(staleness: Duration) -> Self {
        Self {
            mode: DriveMode::Human,
            pending_mode: None,
            software_stop: false,
            staleness,
            autopilot_stale: false,
        }
    }

    #[must_use]
    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    /// Queues a mode switch for the next cycle boundary.
    pub fn request_mode(&mut self, mode: DriveMode) {
        if mode != self.mode {
            self.pending_mode = Some(mode);
        } else {
            self.pending_mode = None;
        }
    }

    #[must_use]
    pub fn software_stop_active(&self) -> bool {
        self.software_stop
    }

    /// Arbitrates one cycle.
    pub fn arbitrate(
        &mut self,
        human: &HumanInput,
        autonomous: Option<&TimedCommand>,
        stop: &StopStatus,
        now: Instant,
    ) -> Arbitration {
        if let Some(mode) = self.pending_mode.take() {
            info!("Drive mode: {} -> {}", self.mode, mode);
            self.mode = mode;
        }
        if human.mode_toggle {
            let next = self.pending_mode.unwrap_or(self.mode).toggled();
            self.request_mode(next);
        }

        self.update_software_stop(human);

        if stop.active {
            return Arbitration::Stop(StopReason::EmergencyStop);
        }
        if self.software_stop {
            return Arbitration::Stop(StopReason::SoftwareStop);
        }

        if self.mode == DriveMode::Autonomous {
            match autonomous.filter(|cmd| cmd.is_fresh(now, self.staleness)) {
                Some(timed) => {
                    if self.autopilot_stale {
                        info!("Autopilot commands resumed");
                        self.autopilot_stale = false;
                    }
                    let mut cmd = timed.command.sanitized();
                    cmd.source = CommandSource::Autonomous;
                    cmd.recording = human.command.recording;
                    return Arbitration::Drive(cmd);
                }
                None => {
                    if !self.autopilot_stale {
                        warn!(
                            "No autopilot command within {:?}, falling back to human input",
                            self.staleness
                        );
                        self.autopilot_stale = true;
                    }
                }
            }
        }

        Arbitration::Drive(human.command.sanitized())
    }

    fn update_software_stop(&mut self, human: &HumanInput) {
        if (human.emergency_button || human.emergency_held) && !self.software_stop {
            warn!("Software emergency stop from gamepad");
            self.software_stop = true;
        } else if self.software_stop && !human.emergency_held && human.command.is_neutral() {
            info!("Software emergency stop cleared");
            self.software_stop = false;
        }
    }
}
