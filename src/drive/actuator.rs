//! # Differential Actuator
//!
//! Drives two H-bridge channels (forward pin, backward pin, PWM enable pin
//! per side) from an [`Arbitration`].
//!
//! ## Safety
//!
//! - A stop bypasses soft-start and drives both sides to `(Stopped, 0.0)`
//!   in the same cycle
//! - On a write failure both sides are driven neutral (best effort) before
//!   the error is returned
//! - `max_actuation_faults` consecutive failing cycles escalate to
//!   [`DriveError::ActuationFatal`]
//! - Dropping the actuator drives every pin low

use tracing::{debug, error, info, warn};

use super::arbiter::Arbitration;
use super::differential::{decompose, Shaping, SoftStart};
use crate::command::{Direction, MotorCommand, Side};
use crate::config::{ControlConfig, MotorConfig};
use crate::error::{DriveError, Result};
use crate::gpio::{GpioBackend, GpioError, Level, OutputLine, PwmLine};

/// The three lines of one H-bridge channel.
pub struct MotorPins {
    forward: Box<dyn OutputLine>,
    backward: Box<dyn OutputLine>,
    enable: Box<dyn PwmLine>,
}

impl std::fmt::Debug for MotorPins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorPins").finish_non_exhaustive()
    }
}

impl MotorPins {
    #[must_use]
    pub fn new(
        forward: Box<dyn OutputLine>,
        backward: Box<dyn OutputLine>,
        enable: Box<dyn PwmLine>,
    ) -> Self {
        Self {
            forward,
            backward,
            enable,
        }
    }

    /// Claims the three pins from `backend`.
    pub fn claim(
        backend: &mut dyn GpioBackend,
        forward_pin: u8,
        backward_pin: u8,
        enable_pin: u8,
        frequency_hz: f64,
    ) -> std::result::Result<Self, GpioError> {
        Ok(Self {
            forward: backend.output(forward_pin)?,
            backward: backend.output(backward_pin)?,
            enable: backend.pwm(enable_pin, frequency_hz)?,
        })
    }

    /// Applies one motor command. The inactive direction pin is released
    /// before the active one is raised.
    fn apply(&mut self, cmd: MotorCommand) -> std::result::Result<(), GpioError> {
        match cmd.direction {
            Direction::Stopped => return self.neutral(),
            Direction::Forward => {
                self.backward.write(Level::Low)?;
                self.forward.write(Level::High)?;
            }
            Direction::Backward => {
                self.forward.write(Level::Low)?;
                self.backward.write(Level::High)?;
            }
        }
        self.enable.set_duty_cycle(f64::from(cmd.duty_cycle))
    }

    /// Zero duty, both direction pins low. Every write is attempted; the
    /// first error is returned.
    fn neutral(&mut self) -> std::result::Result<(), GpioError> {
        let duty = self.enable.set_duty_cycle(0.0);
        let forward = self.forward.write(Level::Low);
        let backward = self.backward.write(Level::Low);
        duty.and(forward).and(backward)
    }
}

/// Two-track motor driver.
#[derive(Debug)]
pub struct DifferentialActuator {
    left: MotorPins,
    right: MotorPins,
    shaping: Shaping,
    ramp: Option<SoftStart>,
    max_faults: u32,
    consecutive_faults: u32,
    last_applied: (MotorCommand, MotorCommand),
    shut_down: bool,
}

impl DifferentialActuator {
    /// Claims all six motor pins from `backend`.
    ///
    /// # Errors
    ///
    /// Returns `Gpio` if any pin cannot be claimed.
    pub fn from_config(backend: &mut dyn GpioBackend, config: &ControlConfig) -> Result<Self> {
        let MotorConfig {
            left_forward_pin,
            left_backward_pin,
            left_enable_pin,
            right_forward_pin,
            right_backward_pin,
            right_enable_pin,
            pwm_frequency_hz,
            ..
        } = config.motors;

        let left = MotorPins::claim(
            backend,
            left_forward_pin,
            left_backward_pin,
            left_enable_pin,
            pwm_frequency_hz,
        )?;
        let right = MotorPins::claim(
            backend,
            right_forward_pin,
            right_backward_pin,
            right_enable_pin,
            pwm_frequency_hz,
        )?;
        info!(
            "Motors claimed via {}: left {}/{}/{}, right {}/{}/{} at {} Hz",
            backend.name(),
            left_forward_pin,
            left_backward_pin,
            left_enable_pin,
            right_forward_pin,
            right_backward_pin,
            right_enable_pin,
            pwm_frequency_hz
        );
        Ok(Self::new(left, right, config))
    }

    #[must_use]
    pub fn new(left: MotorPins, right: MotorPins, config: &ControlConfig) -> Self {
        Self {
            left,
            right,
            shaping: Shaping::from_config(config),
            ramp: config
                .drive
                .soft_start
                .then(|| SoftStart::new(config.drive.max_duty_step)),
            max_faults: config.drive.max_actuation_faults.max(1),
            consecutive_faults: 0,
            last_applied: (MotorCommand::STOPPED, MotorCommand::STOPPED),
            shut_down: false,
        }
    }

    /// Commands for this cycle without touching the pins.
    ///
    /// Advances the soft-start ramp.
    pub fn plan(&mut self, arbitration: &Arbitration) -> (MotorCommand, MotorCommand) {
        match arbitration {
            Arbitration::Stop(_) => {
                if let Some(ramp) = self.ramp.as_mut() {
                    ramp.reset();
                }
                (MotorCommand::STOPPED, MotorCommand::STOPPED)
            }
            Arbitration::Drive(cmd) => {
                let target = decompose(cmd, &self.shaping);
                match self.ramp.as_mut() {
                    Some(ramp) => ramp.step(target),
                    None => target,
                }
            }
        }
    }

    /// Plans and applies one cycle.
    ///
    /// # Errors
    ///
    /// - `Actuation`: a write failed this cycle; outputs were driven neutral
    /// - `ActuationFatal`: writes failed for `max_actuation_faults` cycles in a row
    pub fn actuate(&mut self, arbitration: &Arbitration) -> Result<(MotorCommand, MotorCommand)> {
        let (left, right) = self.plan(arbitration);

        let result = self
            .left
            .apply(left)
            .map_err(|e| (Side::Left, e))
            .and_then(|()| self.right.apply(right).map_err(|e| (Side::Right, e)));

        match result {
            Ok(()) => {
                if self.consecutive_faults > 0 {
                    info!(
                        "Actuation recovered after {} failed cycles",
                        self.consecutive_faults
                    );
                }
                self.consecutive_faults = 0;
                self.last_applied = (left, right);
                Ok((left, right))
            }
            Err((side, source)) => Err(self.fault(side, source)),
        }
    }

    fn fault(&mut self, side: Side, source: GpioError) -> DriveError {
        self.consecutive_faults += 1;
        if let Err(e) = self.neutral() {
            error!("Could not drive motors neutral after fault: {}", e);
        }

        if self.consecutive_faults >= self.max_faults {
            error!(
                "{} motor write failed for {} consecutive cycles: {}",
                side, self.consecutive_faults, source
            );
            DriveError::ActuationFatal {
                consecutive: self.consecutive_faults,
                source,
            }
        } else {
            warn!("{} motor write failed: {}", side, source);
            DriveError::Actuation { side, source }
        }
    }

    fn neutral(&mut self) -> std::result::Result<(), GpioError> {
        if let Some(ramp) = self.ramp.as_mut() {
            ramp.reset();
        }
        self.last_applied = (MotorCommand::STOPPED, MotorCommand::STOPPED);
        let left = self.left.neutral();
        let right = self.right.neutral();
        left.and(right)
    }

    /// Last commands written successfully.
    #[must_use]
    pub fn last_applied(&self) -> (MotorCommand, MotorCommand) {
        self.last_applied
    }

    #[must_use]
    pub fn consecutive_faults(&self) -> u32 {
        self.consecutive_faults
    }

    /// Drives both motors neutral.
    ///
    /// # Errors
    ///
    /// Returns `Gpio` if a neutral write failed; all writes are still attempted.
    pub fn shutdown(&mut self) -> Result<()> {
        self.shut_down = true;
        self.neutral()?;
        info!("Motors stopped");
        Ok(())
    }
}

impl Drop for DifferentialActuator {
    fn drop(&mut self) {
        if let Err(e) = self.neutral() {
            error!("Failed to stop motors on teardown: {}", e);
        } else if !self.shut_down {
            debug!("Motors stopped on drop");
        }
    }
}
