//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! The configuration is read once at startup and never mutated afterwards;
//! components borrow the sections they need.

use serde::de::Error;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{DriveError, Result};
use crate::gpio::{BackendKind, Pull};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ControlConfig {
    #[serde(default)]
    pub motors: MotorConfig,
    #[serde(default)]
    pub emergency: EmergencyConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub autopilot: AutopilotConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Motor pin assignments (BCM numbering) and PWM settings
#[derive(Debug, Deserialize, Clone)]
pub struct MotorConfig {
    #[serde(default = "default_left_forward_pin")]
    pub left_forward_pin: u8,

    #[serde(default = "default_left_backward_pin")]
    pub left_backward_pin: u8,

    #[serde(default = "default_left_enable_pin")]
    pub left_enable_pin: u8,

    #[serde(default = "default_right_forward_pin")]
    pub right_forward_pin: u8,

    #[serde(default = "default_right_backward_pin")]
    pub right_backward_pin: u8,

    #[serde(default = "default_right_enable_pin")]
    pub right_enable_pin: u8,

    #[serde(default = "default_pwm_frequency_hz")]
    pub pwm_frequency_hz: f64,

    #[serde(default = "default_max_duty")]
    pub max_duty: f32,
}

/// How the emergency-stop pin is sampled
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StopStrategy {
    /// Sampled once per control tick
    #[default]
    Polled,
    /// Sampled by a dedicated edge-waiting thread
    Interrupt,
}

/// Emergency-stop configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EmergencyConfig {
    #[serde(default = "default_stop_pin")]
    pub stop_pin: u8,

    #[serde(default)]
    pub reset_pin: Option<u8>,

    #[serde(default = "default_pull_up")]
    pub pull_up: bool,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_debounce_ms")]
    pub reset_debounce_ms: u64,

    #[serde(default)]
    pub strategy: StopStrategy,
}

/// Gamepad input configuration
#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    #[serde(default)]
    pub device_path: String,

    #[serde(default = "default_deadzone")]
    pub deadzone: f32,

    #[serde(default = "default_sensitivity")]
    pub steering_sensitivity: f32,

    #[serde(default = "default_sensitivity")]
    pub throttle_sensitivity: f32,

    #[serde(default = "default_max_throttle")]
    pub max_throttle: f32,

    #[serde(default = "default_invert_throttle")]
    pub invert_throttle: bool,

    #[serde(default = "default_axis_min")]
    pub axis_min: i32,

    #[serde(default = "default_axis_max")]
    pub axis_max: i32,

    #[serde(default = "default_dpad_step")]
    pub dpad_step: f32,

    #[serde(default = "default_hold_cycles")]
    pub hold_cycles: u32,

    #[serde(default)]
    pub read_timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Record whenever the throttle is non-zero, on top of the button toggle.
    #[serde(default)]
    pub auto_record: bool,
}

/// Drive pipeline configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DriveConfig {
    #[serde(default = "default_control_rate_hz")]
    pub control_rate_hz: u32,

    #[serde(default = "default_min_throttle")]
    pub min_throttle: f32,

    #[serde(default = "default_neutral_epsilon")]
    pub neutral_epsilon: f32,

    #[serde(default = "default_soft_start")]
    pub soft_start: bool,

    #[serde(default = "default_max_duty_step")]
    pub max_duty_step: f32,

    #[serde(default = "default_autopilot_timeout_ms")]
    pub autopilot_timeout_ms: u64,

    #[serde(default = "default_max_actuation_faults")]
    pub max_actuation_faults: u32,
}

/// Where autonomous commands come from
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AutopilotSource {
    #[default]
    None,
    /// JSON lines on standard input
    Stdin,
}

/// Autopilot link configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AutopilotConfig {
    #[serde(default)]
    pub source: AutopilotSource,
}

/// GPIO backend selection
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HardwareConfig {
    #[serde(default)]
    pub backend: BackendKind,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling log files; console only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

// Default value functions
fn default_left_forward_pin() -> u8 { 17 }
fn default_left_backward_pin() -> u8 { 27 }
fn default_left_enable_pin() -> u8 { 22 }
fn default_right_forward_pin() -> u8 { 23 }
fn default_right_backward_pin() -> u8 { 24 }
fn default_right_enable_pin() -> u8 { 25 }
fn default_pwm_frequency_hz() -> f64 { 1000.0 }
fn default_max_duty() -> f32 { 1.0 }

fn default_stop_pin() -> u8 { 26 }
fn default_pull_up() -> bool { true }
fn default_debounce_ms() -> u64 { 100 }

fn default_deadzone() -> f32 { 0.05 }
fn default_sensitivity() -> f32 { 1.0 }
fn default_max_throttle() -> f32 { 0.8 }
fn default_invert_throttle() -> bool { true }
fn default_axis_min() -> i32 { 0 }
fn default_axis_max() -> i32 { 255 }
fn default_dpad_step() -> f32 { 0.5 }
fn default_hold_cycles() -> u32 { 5 }
fn default_reconnect_interval_ms() -> u64 { 1000 }

fn default_control_rate_hz() -> u32 { 20 }
fn default_min_throttle() -> f32 { 0.3 }
fn default_neutral_epsilon() -> f32 { 0.02 }
fn default_soft_start() -> bool { true }
fn default_max_duty_step() -> f32 { 0.05 }
fn default_autopilot_timeout_ms() -> u64 { 250 }
fn default_max_actuation_faults() -> u32 { 3 }

fn default_log_level() -> String { "info".to_string() }

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            left_forward_pin: default_left_forward_pin(),
            left_backward_pin: default_left_backward_pin(),
            left_enable_pin: default_left_enable_pin(),
            right_forward_pin: default_right_forward_pin(),
            right_backward_pin: default_right_backward_pin(),
            right_enable_pin: default_right_enable_pin(),
            pwm_frequency_hz: default_pwm_frequency_hz(),
            max_duty: default_max_duty(),
        }
    }
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            stop_pin: default_stop_pin(),
            reset_pin: None,
            pull_up: default_pull_up(),
            debounce_ms: default_debounce_ms(),
            reset_debounce_ms: default_debounce_ms(),
            strategy: StopStrategy::default(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            device_path: String::new(),
            deadzone: default_deadzone(),
            steering_sensitivity: default_sensitivity(),
            throttle_sensitivity: default_sensitivity(),
            max_throttle: default_max_throttle(),
            invert_throttle: default_invert_throttle(),
            axis_min: default_axis_min(),
            axis_max: default_axis_max(),
            dpad_step: default_dpad_step(),
            hold_cycles: default_hold_cycles(),
            read_timeout_ms: 0,
            reconnect_interval_ms: default_reconnect_interval_ms(),
            auto_record: false,
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            control_rate_hz: default_control_rate_hz(),
            min_throttle: default_min_throttle(),
            neutral_epsilon: default_neutral_epsilon(),
            soft_start: default_soft_start(),
            max_duty_step: default_max_duty_step(),
            autopilot_timeout_ms: default_autopilot_timeout_ms(),
            max_actuation_faults: default_max_actuation_faults(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

impl EmergencyConfig {
    /// Bias resistor implied by the wiring polarity.
    #[must_use]
    pub fn pull(&self) -> Pull {
        if self.pull_up {
            Pull::Up
        } else {
            Pull::Down
        }
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn reset_debounce(&self) -> Duration {
        Duration::from_millis(self.reset_debounce_ms)
    }
}

impl InputConfig {
    /// Bounded staleness for device samples, `None` when disabled.
    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}

impl DriveConfig {
    /// Period of one control tick.
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.control_rate_hz.max(1)))
    }

    #[must_use]
    pub fn autopilot_timeout(&self) -> Duration {
        Duration::from_millis(self.autopilot_timeout_ms)
    }
}

fn invalid(msg: impl std::fmt::Display) -> DriveError {
    DriveError::Config(toml::de::Error::custom(msg))
}

impl ControlConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tracked_drive::config::ControlConfig;
    ///
    /// let config = ControlConfig::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    ///
    /// # Examples
    ///
    /// ```
    /// use tracked_drive::config::ControlConfig;
    ///
    /// let config = ControlConfig::from_toml("[input]\ndeadzone = 0.1\n")?;
    /// assert_eq!(config.input.deadzone, 0.1);
    /// assert_eq!(config.emergency.stop_pin, 26);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: ControlConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        let m = &self.motors;

        // Validate pin assignments
        let motor_pins = [
            m.left_forward_pin,
            m.left_backward_pin,
            m.left_enable_pin,
            m.right_forward_pin,
            m.right_backward_pin,
            m.right_enable_pin,
        ];
        let mut seen = HashSet::new();
        for pin in motor_pins {
            if pin > 27 {
                return Err(invalid(format!("motor pin {} is out of range (0-27)", pin)));
            }
            if !seen.insert(pin) {
                return Err(invalid(format!("motor pin {} is assigned twice", pin)));
            }
        }

        let e = &self.emergency;
        if e.stop_pin > 27 || seen.contains(&e.stop_pin) {
            return Err(invalid("stop_pin must be 0-27 and not shared with a motor pin"));
        }
        if let Some(reset) = e.reset_pin {
            if reset > 27 || seen.contains(&reset) || reset == e.stop_pin {
                return Err(invalid(
                    "reset_pin must be 0-27 and not shared with the stop pin or a motor pin",
                ));
            }
        }

        // Validate PWM
        if !(1.0..=100_000.0).contains(&m.pwm_frequency_hz) {
            return Err(invalid("pwm_frequency_hz must be between 1 and 100000"));
        }
        if !(m.max_duty > 0.0 && m.max_duty <= 1.0) {
            return Err(invalid("max_duty must be greater than 0.0 and at most 1.0"));
        }

        // Validate debounce windows
        if e.debounce_ms == 0 || e.debounce_ms > 5000 {
            return Err(invalid("debounce_ms must be between 1 and 5000"));
        }
        if e.reset_debounce_ms == 0 || e.reset_debounce_ms > 5000 {
            return Err(invalid("reset_debounce_ms must be between 1 and 5000"));
        }

        // Validate input shaping
        let i = &self.input;
        if !(0.0..=0.5).contains(&i.deadzone) {
            return Err(invalid("deadzone must be between 0.0 and 0.5"));
        }
        for (name, value) in [
            ("steering_sensitivity", i.steering_sensitivity),
            ("throttle_sensitivity", i.throttle_sensitivity),
        ] {
            if !(value > 0.0 && value <= 5.0) {
                return Err(invalid(format!("{} must be greater than 0.0 and at most 5.0", name)));
            }
        }
        if !(i.max_throttle > 0.0 && i.max_throttle <= 1.0) {
            return Err(invalid("max_throttle must be greater than 0.0 and at most 1.0"));
        }
        if i.axis_min >= i.axis_max {
            return Err(invalid("axis_min must be less than axis_max"));
        }
        if !(0.0..=1.0).contains(&i.dpad_step) {
            return Err(invalid("dpad_step must be between 0.0 and 1.0"));
        }
        if i.hold_cycles > 1000 {
            return Err(invalid("hold_cycles must be at most 1000"));
        }
        if i.read_timeout_ms > 60000 {
            return Err(invalid("read_timeout_ms must be at most 60000"));
        }
        if i.reconnect_interval_ms == 0 || i.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        // Validate drive pipeline
        let d = &self.drive;
        if d.control_rate_hz == 0 || d.control_rate_hz > 1000 {
            return Err(invalid("control_rate_hz must be between 1 and 1000"));
        }
        if !(0.0..1.0).contains(&d.min_throttle) {
            return Err(invalid("min_throttle must be between 0.0 and 1.0 (exclusive)"));
        }
        if !(0.0..=0.2).contains(&d.neutral_epsilon) {
            return Err(invalid("neutral_epsilon must be between 0.0 and 0.2"));
        }
        if !(d.max_duty_step > 0.0 && d.max_duty_step <= 1.0) {
            return Err(invalid("max_duty_step must be greater than 0.0 and at most 1.0"));
        }
        if d.autopilot_timeout_ms == 0 || d.autopilot_timeout_ms > 10000 {
            return Err(invalid("autopilot_timeout_ms must be between 1 and 10000"));
        }
        if d.max_actuation_faults == 0 {
            return Err(invalid("max_actuation_faults must be greater than 0"));
        }

        // Validate logging
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(invalid("logging level must be one of: trace, debug, info, warn, error"));
        }
        if self.logging.dir.as_deref() == Some("") {
            return Err(invalid("logging dir cannot be empty when set"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> ControlConfig {
        ControlConfig::default()
    }

    #[test]
    fn test_default_config() {
        assert!(create_valid_config().validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[motors]
pwm_frequency_hz = 2000.0

[emergency]
stop_pin = 5
reset_pin = 6
strategy = "interrupt"

[input]
deadzone = 0.08
auto_record = true

[drive]
soft_start = false

[autopilot]
source = "stdin"

[hardware]
backend = "simulated"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = ControlConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.motors.pwm_frequency_hz, 2000.0);
        assert_eq!(config.emergency.stop_pin, 5);
        assert_eq!(config.emergency.reset_pin, Some(6));
        assert_eq!(config.emergency.strategy, StopStrategy::Interrupt);
        assert_eq!(config.input.deadzone, 0.08);
        assert!(config.input.auto_record);
        assert!(!config.drive.soft_start);
        assert_eq!(config.autopilot.source, AutopilotSource::Stdin);
        assert_eq!(config.hardware.backend, BackendKind::Simulated);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ControlConfig::from_toml("").unwrap();
        assert_eq!(config.motors.left_forward_pin, 17);
        assert_eq!(config.emergency.reset_pin, None);
        assert_eq!(config.emergency.strategy, StopStrategy::Polled);
        assert_eq!(config.hardware.backend, BackendKind::Rpi);
        assert_eq!(config.autopilot.source, AutopilotSource::None);
        assert!(!config.input.auto_record);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        match ControlConfig::load("/nonexistent/tracked-drive.toml") {
            Err(DriveError::Io(_)) => {}
            other => panic!("Expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            ControlConfig::from_toml("[motors\n"),
            Err(DriveError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        assert!(ControlConfig::from_toml("[emergency]\nstrategy = \"magic\"\n").is_err());
    }

    #[test]
    fn test_duplicate_motor_pin() {
        let mut config = create_valid_config();
        config.motors.right_enable_pin = config.motors.left_enable_pin;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_motor_pin_out_of_range() {
        let mut config = create_valid_config();
        config.motors.left_forward_pin = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stop_pin_shared_with_motor() {
        let mut config = create_valid_config();
        config.emergency.stop_pin = config.motors.left_forward_pin;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reset_pin_equals_stop_pin() {
        let mut config = create_valid_config();
        config.emergency.reset_pin = Some(config.emergency.stop_pin);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debounce_zero() {
        let mut config = create_valid_config();
        config.emergency.debounce_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reset_debounce_too_high() {
        let mut config = create_valid_config();
        config.emergency.reset_debounce_ms = 5001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deadzone_negative() {
        let mut config = create_valid_config();
        config.input.deadzone = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deadzone_too_high() {
        let mut config = create_valid_config();
        config.input.deadzone = 0.6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sensitivity_zero() {
        let mut config = create_valid_config();
        config.input.steering_sensitivity = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_throttle_zero() {
        let mut config = create_valid_config();
        config.input.max_throttle = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_axis_range_inverted() {
        let mut config = create_valid_config();
        config.input.axis_min = 255;
        config.input.axis_max = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_duty_out_of_range() {
        let mut config = create_valid_config();
        config.motors.max_duty = 1.5;
        assert!(config.validate().is_err());
        config.motors.max_duty = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pwm_frequency_zero() {
        let mut config = create_valid_config();
        config.motors.pwm_frequency_hz = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_control_rate_zero() {
        let mut config = create_valid_config();
        config.drive.control_rate_hz = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_throttle_one() {
        let mut config = create_valid_config();
        config.drive.min_throttle = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_duty_step_zero() {
        let mut config = create_valid_config();
        config.drive.max_duty_step = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_actuation_faults_zero() {
        let mut config = create_valid_config();
        config.drive.max_actuation_faults = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = create_valid_config();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_log_dir() {
        let mut config = create_valid_config();
        config.logging.dir = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pull_follows_polarity() {
        let mut config = create_valid_config();
        assert_eq!(config.emergency.pull(), Pull::Up);
        config.emergency.pull_up = false;
        assert_eq!(config.emergency.pull(), Pull::Down);
    }

    #[test]
    fn test_tick_period() {
        let config = create_valid_config();
        assert_eq!(config.drive.tick_period(), Duration::from_millis(50));
    }

    #[test]
    fn test_read_timeout_disabled_by_default() {
        let mut config = create_valid_config();
        assert_eq!(config.input.read_timeout(), None);
        config.input.read_timeout_ms = 200;
        assert_eq!(config.input.read_timeout(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_left_forward_pin(), 17);
        assert_eq!(default_left_backward_pin(), 27);
        assert_eq!(default_left_enable_pin(), 22);
        assert_eq!(default_right_forward_pin(), 23);
        assert_eq!(default_right_backward_pin(), 24);
        assert_eq!(default_right_enable_pin(), 25);
        assert_eq!(default_pwm_frequency_hz(), 1000.0);
        assert_eq!(default_stop_pin(), 26);
        assert_eq!(default_debounce_ms(), 100);
        assert_eq!(default_deadzone(), 0.05);
        assert_eq!(default_max_throttle(), 0.8);
        assert_eq!(default_dpad_step(), 0.5);
        assert_eq!(default_min_throttle(), 0.3);
        assert_eq!(default_max_duty_step(), 0.05);
        assert_eq!(default_autopilot_timeout_ms(), 250);
        assert_eq!(default_log_level(), "info");
    }
}
