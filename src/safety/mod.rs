//! # Safety Module
//!
//! Hardware emergency stop.
//!
//! This module handles:
//! - Debouncing the stop and reset buttons
//! - The IDLE / TRIGGERED / LATCHED state machine
//! - Publishing stop status to the control loop and other observers
//! - Degraded operation when GPIO is unavailable

pub mod debounce;
pub mod monitor;
pub mod state;

pub use monitor::{EmergencyStopMonitor, StopEvent, StopWatcher};
pub use state::{StopPhase, StopState, StopStatus};
