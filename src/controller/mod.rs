//! # Controller Module
//!
//! Gamepad input handling.
//!
//! This module handles:
//! - Gamepad detection and connection via evdev
//! - Folding raw events into normalized samples
//! - Applying deadzones and sensitivity
//! - Mapping samples to human drive commands, including fault fallback

pub mod calibration;
pub mod gamepad;
pub mod input;
pub mod mapper;

use std::fmt;
use std::time::Instant;

use mapper::RawSample;

/// Why a cycle produced no usable sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFault {
    /// The device went away or was never found.
    Disconnected,
    /// No fresh report within the configured read timeout.
    Timeout,
    /// The sample contained non-finite or out-of-range values.
    OutOfRange,
}

impl fmt::Display for InputFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFault::Disconnected => write!(f, "device disconnected"),
            InputFault::Timeout => write!(f, "read timed out"),
            InputFault::OutOfRange => write!(f, "sample out of range"),
        }
    }
}

/// Something that yields one raw sample per control cycle.
///
/// Implementations must not block: return the latest known sample or a fault.
pub trait SampleSource {
    fn read_sample(&mut self, now: Instant) -> Result<RawSample, InputFault>;
}

impl<F> SampleSource for F
where
    F: FnMut(Instant) -> Result<RawSample, InputFault>,
{
    fn read_sample(&mut self, now: Instant) -> Result<RawSample, InputFault> {
        self(now)
    }
}

/// Source used while no gamepad is connected.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disconnected;

impl SampleSource for Disconnected {
    fn read_sample(&mut self, _now: Instant) -> Result<RawSample, InputFault> {
        Err(InputFault::Disconnected)
    }
}
