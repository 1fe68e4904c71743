//! # Drive Module
//!
//! From competing commands to motor pins.
//!
//! This module handles:
//! - Arbitration between emergency stops, the autopilot and the gamepad
//! - Differential-drive decomposition and soft-start ramping
//! - Driving the H-bridge pins, with fault escalation and safe teardown

pub mod actuator;
pub mod arbiter;
pub mod differential;

pub use actuator::{DifferentialActuator, MotorPins};
pub use arbiter::{Arbitration, DriveArbiter, StopReason};
