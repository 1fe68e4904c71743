//! # Tracked Drive Library
//!
//! Drive a two-track vehicle from a gamepad or an autopilot, with a
//! debounced hardware emergency stop that overrides both.
//!
//! Per control cycle: gamepad sample → [`controller::input::InputMapper`];
//! stop pin → [`safety::EmergencyStopMonitor`]; both plus the autopilot →
//! [`drive::DriveArbiter`] → [`drive::DifferentialActuator`] → GPIO.
//! [`control::ControlLoop`] runs one such cycle per call.

pub mod autopilot;
pub mod command;
pub mod config;
pub mod control;
pub mod controller;
pub mod drive;
pub mod error;
pub mod gpio;
pub mod safety;
