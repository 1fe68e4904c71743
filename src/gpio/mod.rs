//! # GPIO Module
//!
//! Hardware abstraction over digital inputs, digital outputs and PWM outputs.
//!
//! This module handles:
//! - A backend trait so the drive core never touches a concrete GPIO library
//! - An in-memory [`SimulatedGpio`] backend for desktop runs and tests
//! - A Raspberry Pi backend built on `rppal` (cargo feature `rpi`)
//!
//! Lines are owned handles: whoever holds a line owns the pin until drop.

pub mod sim;

#[cfg(feature = "rpi")]
pub mod rpi;

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use sim::SimulatedGpio;

/// Electrical level of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    #[default]
    Low,
    High,
}

impl std::ops::Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Input bias resistor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Up,
    Down,
    None,
}

impl Pull {
    /// Level the pin rests at when nothing drives it.
    #[must_use]
    pub fn idle_level(self) -> Level {
        match self {
            Pull::Up => Level::High,
            Pull::Down | Pull::None => Level::Low,
        }
    }
}

/// Which GPIO backend the binary should open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Raspberry Pi GPIO through `rppal`.
    #[default]
    Rpi,
    /// In-memory pins, no hardware.
    Simulated,
}

/// GPIO errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GpioError {
    /// The backend cannot be used at all (missing library, permissions, not a Pi)
    #[error("GPIO backend unavailable: {0}")]
    Unavailable(String),

    /// A pin could not be claimed or configured
    #[error("GPIO pin {pin}: {reason}")]
    Pin { pin: u8, reason: String },

    /// Writing a level or duty cycle failed
    #[error("GPIO write to pin {pin} failed: {reason}")]
    Write { pin: u8, reason: String },

    /// Reading a level failed
    #[error("GPIO read from pin {pin} failed: {reason}")]
    Read { pin: u8, reason: String },
}

/// A claimed digital input.
pub trait InputLine: Send {
    /// Reads the current level.
    fn read(&mut self) -> Result<Level, GpioError>;

    /// Blocks until the level changes or `timeout` elapses.
    ///
    /// Returns the new level on an edge, `None` on timeout.
    fn wait_for_edge(&mut self, timeout: Duration) -> Result<Option<Level>, GpioError>;
}

/// A claimed digital output.
#[cfg_attr(test, mockall::automock)]
pub trait OutputLine: Send {
    fn write(&mut self, level: Level) -> Result<(), GpioError>;
}

/// A claimed PWM output.
#[cfg_attr(test, mockall::automock)]
pub trait PwmLine: Send {
    /// Sets the duty cycle, `0.0..=1.0`. Zero disables the output.
    fn set_duty_cycle(&mut self, duty: f64) -> Result<(), GpioError>;
}

/// Factory for claimed lines.
pub trait GpioBackend {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn input(&mut self, pin: u8, pull: Pull) -> Result<Box<dyn InputLine>, GpioError>;

    /// Claims an output, initially driven low.
    fn output(&mut self, pin: u8) -> Result<Box<dyn OutputLine>, GpioError>;

    /// Claims a PWM output at `frequency_hz`, initially at zero duty.
    fn pwm(&mut self, pin: u8, frequency_hz: f64) -> Result<Box<dyn PwmLine>, GpioError>;
}

/// Opens the requested backend.
///
/// # Errors
///
/// Returns [`GpioError::Unavailable`] if the Raspberry Pi backend was requested
/// but cannot be opened, or the crate was built without the `rpi` feature.
pub fn open_backend(kind: BackendKind) -> Result<Box<dyn GpioBackend>, GpioError> {
    match kind {
        BackendKind::Simulated => Ok(Box::new(SimulatedGpio::new())),
        #[cfg(feature = "rpi")]
        BackendKind::Rpi => Ok(Box::new(rpi::RpiGpio::new()?)),
        #[cfg(not(feature = "rpi"))]
        BackendKind::Rpi => Err(GpioError::Unavailable(
            "built without the `rpi` feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_not() {
        assert_eq!(!Level::High, Level::Low);
        assert_eq!(!Level::Low, Level::High);
        assert_eq!(Level::from(true), Level::High);
    }

    #[test]
    fn test_pull_idle_level() {
        assert_eq!(Pull::Up.idle_level(), Level::High);
        assert_eq!(Pull::Down.idle_level(), Level::Low);
        assert_eq!(Pull::None.idle_level(), Level::Low);
    }

    #[test]
    fn test_open_simulated_backend() {
        let backend = open_backend(BackendKind::Simulated).unwrap();
        assert_eq!(backend.name(), "simulated");
    }

    #[cfg(not(feature = "rpi"))]
    #[test]
    fn test_rpi_backend_unavailable_without_feature() {
        match open_backend(BackendKind::Rpi) {
            Err(GpioError::Unavailable(msg)) => assert!(msg.contains("rpi")),
            Err(other) => panic!("Expected Unavailable, got: {:?}", other),
            Ok(_) => panic!("Expected Unavailable, got a backend"),
        }
    }
}
