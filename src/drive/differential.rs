//! # Differential Drive
//!
//! Pure decomposition of a steering/throttle pair into per-track motor
//! commands, plus the soft-start rate limiter.
//!
//! ## Mixing
//!
//! ```text
//! left  = clamp(throttle + steering, -1, 1)
//! right = clamp(throttle - steering, -1, 1)
//! ```
//!
//! Each side is clamped on its own, not rescaled, so full throttle with a
//! little steering still drives the outer track at full speed.
//!
//! ## Per-side mapping
//!
//! | Mixed value | Direction | Duty |
//! |-------------|-----------|------|
//! | `\|v\| <= neutral_epsilon` | Stopped | 0.0 |
//! | `v > 0` | Forward | `max(\|v\|, min_throttle) * max_duty` |
//! | `v < 0` | Backward | `max(\|v\|, min_throttle) * max_duty` |
//!
//! ```
//! use tracked_drive::command::{Direction, NormalizedCommand};
//! use tracked_drive::drive::differential::{decompose, Shaping};
//!
//! let shaping = Shaping { max_duty: 1.0, min_throttle: 0.0, neutral_epsilon: 0.02 };
//! let (left, right) = decompose(&NormalizedCommand::human(0.5, 0.5), &shaping);
//! assert_eq!(left.direction, Direction::Forward);
//! assert_eq!(left.duty_cycle, 1.0);
//! assert!(right.is_stopped());
//! ```

use crate::command::{Direction, MotorCommand, NormalizedCommand};
use crate::config::ControlConfig;

/// Output shaping shared by both sides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shaping {
    /// Duty cycle at full command.
    pub max_duty: f32,
    /// Smallest non-zero magnitude, as a fraction of full command.
    pub min_throttle: f32,
    /// Magnitudes at or below this are treated as stopped.
    pub neutral_epsilon: f32,
}

impl Default for Shaping {
    fn default() -> Self {
        Self {
            max_duty: 1.0,
            min_throttle: 0.0,
            neutral_epsilon: 0.02,
        }
    }
}

impl Shaping {
    #[must_use]
    pub fn from_config(config: &ControlConfig) -> Self {
        Self {
            max_duty: config.motors.max_duty,
            min_throttle: config.drive.min_throttle,
            neutral_epsilon: config.drive.neutral_epsilon,
        }
    }
}

/// Mixes steering and throttle into `(left, right)`, each clamped.
#[must_use]
pub fn mix(steering: f32, throttle: f32) -> (f32, f32) {
    let left = (throttle + steering).clamp(-1.0, 1.0);
    let right = (throttle - steering).clamp(-1.0, 1.0);
    (left, right)
}

/// Maps one mixed value to a motor command.
#[must_use]
pub fn to_motor(value: f32, shaping: &Shaping) -> MotorCommand {
    if value.is_nan() || value.abs() <= shaping.neutral_epsilon {
        return MotorCommand::STOPPED;
    }
    let magnitude = value.abs().clamp(shaping.min_throttle, 1.0);
    MotorCommand {
        direction: if value > 0.0 {
            Direction::Forward
        } else {
            Direction::Backward
        },
        duty_cycle: magnitude * shaping.max_duty,
    }
}

/// Decomposes a command into `(left, right)` motor commands.
#[must_use]
pub fn decompose(cmd: &NormalizedCommand, shaping: &Shaping) -> (MotorCommand, MotorCommand) {
    let cmd = cmd.sanitized();
    let (left, right) = mix(cmd.steering, cmd.throttle);
    (to_motor(left, shaping), to_motor(right, shaping))
}

fn from_signed(value: f32) -> MotorCommand {
    if value > 0.0 {
        MotorCommand {
            direction: Direction::Forward,
            duty_cycle: value,
        }
    } else if value < 0.0 {
        MotorCommand {
            direction: Direction::Backward,
            duty_cycle: -value,
        }
    } else {
        MotorCommand::STOPPED
    }
}

/// Per-tick rate limit on each side's signed duty.
///
/// Acceleration and deceleration are both limited. A reversal passes
/// through an explicit zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftStart {
    max_step: f32,
    left: f32,
    right: f32,
}

impl SoftStart {
    #[must_use]
    pub fn new(max_step: f32) -> Self {
        Self {
            max_step: max_step.max(f32::EPSILON),
            left: 0.0,
            right: 0.0,
        }
    }

    /// Moves each side at most one step toward its target.
    pub fn step(&mut self, target: (MotorCommand, MotorCommand)) -> (MotorCommand, MotorCommand) {
        self.left = ramp(self.left, target.0.signed(), self.max_step);
        self.right = ramp(self.right, target.1.signed(), self.max_step);
        (from_signed(self.left), from_signed(self.right))
    }

    /// Forgets the ramp position; used after an emergency stop or fault.
    pub fn reset(&mut self) {
        self.left = 0.0;
        self.right = 0.0;
    }
}

fn ramp(current: f32, target: f32, max_step: f32) -> f32 {
    let delta = target - current;
    if delta.abs() <= max_step {
        return target;
    }
    let next = current + max_step.copysign(delta);
    if current != 0.0 && next != 0.0 && next.signum() != current.signum() {
        0.0
    } else {
        next
    }
}
