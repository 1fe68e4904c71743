//! # Command Types
//!
//! Value types that flow through one control cycle:
//!
//! ```text
//! RawSample -> NormalizedCommand -> Arbitration -> (MotorCommand, MotorCommand)
//! ```
//!
//! Steering and throttle are always normalized to `-1.0..=1.0`. Positive
//! throttle drives forward, positive steering turns right (left track faster).

use std::fmt;
use std::time::{Duration, Instant};

/// Where a command originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandSource {
    /// Gamepad input mapped by [`InputMapper`](crate::controller::input::InputMapper).
    #[default]
    Human,
    /// Autopilot link.
    Autonomous,
}

/// Which source the arbiter prefers when no stop is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveMode {
    #[default]
    Human,
    Autonomous,
}

impl DriveMode {
    /// Returns the other mode.
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            DriveMode::Human => DriveMode::Autonomous,
            DriveMode::Autonomous => DriveMode::Human,
        }
    }
}

impl fmt::Display for DriveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveMode::Human => write!(f, "human"),
            DriveMode::Autonomous => write!(f, "autonomous"),
        }
    }
}

/// Normalized steering/throttle command for one cycle.
///
/// # Examples
///
/// ```
/// use tracked_drive::command::NormalizedCommand;
///
/// let cmd = NormalizedCommand::human(2.0, f32::NAN);
/// assert_eq!(cmd.steering, 1.0);
/// assert_eq!(cmd.throttle, 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NormalizedCommand {
    /// Steering, -1.0 (full left) to 1.0 (full right).
    pub steering: f32,
    /// Throttle, -1.0 (full reverse) to 1.0 (full forward).
    pub throttle: f32,
    /// Whether training-data recording is enabled.
    pub recording: bool,
    pub source: CommandSource,
}

impl NormalizedCommand {
    /// Creates a sanitized human command.
    #[must_use]
    pub fn human(steering: f32, throttle: f32) -> Self {
        Self {
            steering: sanitize(steering),
            throttle: sanitize(throttle),
            recording: false,
            source: CommandSource::Human,
        }
    }

    /// Creates a sanitized autonomous command.
    #[must_use]
    pub fn autonomous(steering: f32, throttle: f32) -> Self {
        Self {
            steering: sanitize(steering),
            throttle: sanitize(throttle),
            recording: false,
            source: CommandSource::Autonomous,
        }
    }

    /// Neutral command from the given source.
    #[must_use]
    pub fn neutral(source: CommandSource) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    /// Returns a copy with both axes clamped and NaN replaced by zero.
    #[must_use]
    pub fn sanitized(self) -> Self {
        Self {
            steering: sanitize(self.steering),
            throttle: sanitize(self.throttle),
            ..self
        }
    }

    /// Returns `true` if both axes are exactly zero.
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        self.steering == 0.0 && self.throttle == 0.0
    }
}

/// A command stamped with the time it was issued.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedCommand {
    pub command: NormalizedCommand,
    pub issued_at: Instant,
}

impl TimedCommand {
    #[must_use]
    pub fn new(command: NormalizedCommand, issued_at: Instant) -> Self {
        Self { command, issued_at }
    }

    /// Age at `now`; zero if `now` is earlier than the issue time.
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.issued_at)
    }

    /// Returns `true` if the command is younger than `max_age`.
    #[must_use]
    pub fn is_fresh(&self, now: Instant, max_age: Duration) -> bool {
        self.age(now) < max_age
    }
}

/// Clamps to `-1.0..=1.0`, mapping NaN to `0.0`.
#[must_use]
pub fn sanitize(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

/// Motor side on the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// Rotation direction of one track motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Forward,
    Backward,
    #[default]
    Stopped,
}

/// Direction and PWM duty for one motor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotorCommand {
    pub direction: Direction,
    /// Duty cycle, 0.0 to `max_duty`.
    pub duty_cycle: f32,
}

impl MotorCommand {
    /// The safe state: stopped with zero duty.
    pub const STOPPED: MotorCommand = MotorCommand {
        direction: Direction::Stopped,
        duty_cycle: 0.0,
    };

    /// Returns `true` if this is exactly `(Stopped, 0.0)`.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self == Self::STOPPED
    }

    /// Signed speed: positive forward, negative backward.
    #[must_use]
    pub fn signed(&self) -> f32 {
        match self.direction {
            Direction::Forward => self.duty_cycle,
            Direction::Backward => -self.duty_cycle,
            Direction::Stopped => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_clamps_and_drops_nan() {
        assert_eq!(sanitize(1.5), 1.0);
        assert_eq!(sanitize(-3.0), -1.0);
        assert_eq!(sanitize(f32::NAN), 0.0);
        assert_eq!(sanitize(f32::INFINITY), 1.0);
        assert_eq!(sanitize(0.25), 0.25);
    }

    #[test]
    fn test_neutral_command() {
        let cmd = NormalizedCommand::neutral(CommandSource::Autonomous);
        assert!(cmd.is_neutral());
        assert_eq!(cmd.source, CommandSource::Autonomous);
        assert!(!cmd.recording);
    }

    #[test]
    fn test_timed_command_freshness() {
        let t0 = Instant::now();
        let timed = TimedCommand::new(NormalizedCommand::autonomous(0.1, 0.2), t0);
        let bound = Duration::from_millis(250);
        assert!(timed.is_fresh(t0, bound));
        assert!(timed.is_fresh(t0 + Duration::from_millis(249), bound));
        assert!(!timed.is_fresh(t0 + bound, bound));
        assert_eq!(timed.age(t0), Duration::ZERO);
    }

    #[test]
    fn test_drive_mode_toggle() {
        assert_eq!(DriveMode::Human.toggled(), DriveMode::Autonomous);
        assert_eq!(DriveMode::Autonomous.toggled(), DriveMode::Human);
    }

    #[test]
    fn test_motor_command_signed() {
        let fwd = MotorCommand { direction: Direction::Forward, duty_cycle: 0.4 };
        let back = MotorCommand { direction: Direction::Backward, duty_cycle: 0.4 };
        assert_eq!(fwd.signed(), 0.4);
        assert_eq!(back.signed(), -0.4);
        assert_eq!(MotorCommand::STOPPED.signed(), 0.0);
        assert!(MotorCommand::default().is_stopped());
    }
}
