//! # Input Mapper
//!
//! Turns one [`RawSample`] per cycle into a human [`NormalizedCommand`].
//!
//! ## Mapping
//!
//! - Steering: left stick X, or `dpad_x * dpad_step` when the D-pad is held
//! - Throttle: left stick Y, or `-dpad_y * dpad_step` when the D-pad is held,
//!   then scaled by `max_throttle`
//! - Buttons act on the press edge only: recording toggle, software emergency
//!   stop, drive mode toggle
//! - With `auto_record`, recording is also on while the throttle is non-zero
//!
//! ## Faults
//!
//! A disconnect, timeout or out-of-range sample repeats the last good command
//! for `hold_cycles` cycles, then degrades to neutral until a good sample
//! arrives. A full-throttle command is never held indefinitely.
//!
//! ```
//! use tracked_drive::config::InputConfig;
//! use tracked_drive::controller::input::InputMapper;
//! use tracked_drive::controller::mapper::RawSample;
//! use tracked_drive::controller::InputFault;
//!
//! let mut mapper = InputMapper::new(&InputConfig::default());
//! let sample = RawSample { axis_x: 0.5, axis_y: 1.0, ..RawSample::default() };
//!
//! let input = mapper.map(Ok(sample));
//! assert_eq!(input.command.steering, 0.5);
//! assert_eq!(input.command.throttle, 0.8); // max_throttle
//!
//! // Held for a few cycles, then neutral
//! for _ in 0..5 {
//!     assert_eq!(mapper.map(Err(InputFault::Timeout)).command.throttle, 0.8);
//! }
//! assert!(mapper.map(Err(InputFault::Timeout)).command.is_neutral());
//! ```

use tracing::{error, info, warn};

use super::calibration::AxisShaping;
use super::mapper::{buttons, RawSample};
use super::InputFault;
use crate::command::{sanitize, NormalizedCommand};
use crate::config::InputConfig;

/// Result of mapping one cycle of gamepad input.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HumanInput {
    pub command: NormalizedCommand,
    /// Software emergency button was pressed this cycle.
    pub emergency_button: bool,
    /// Software emergency button is currently held.
    pub emergency_held: bool,
    /// Drive mode button was pressed this cycle.
    pub mode_toggle: bool,
    /// Set when this cycle's sample was unusable.
    pub fault: Option<InputFault>,
}

/// Stateful gamepad-to-command mapper.
#[derive(Debug)]
pub struct InputMapper {
    steering: AxisShaping,
    throttle: AxisShaping,
    max_throttle: f32,
    dpad_step: f32,
    hold_cycles: u32,
    auto_record: bool,

    last_good: NormalizedCommand,
    recording: bool,
    prev_buttons: u16,
    fault_cycles: u32,
}

impl InputMapper {
    #[must_use]
    pub fn new(config: &InputConfig) -> Self {
        Self {
            steering: AxisShaping::new(config.deadzone, config.steering_sensitivity),
            throttle: AxisShaping::new(config.deadzone, config.throttle_sensitivity),
            max_throttle: config.max_throttle.clamp(0.0, 1.0),
            dpad_step: config.dpad_step,
            hold_cycles: config.hold_cycles,
            auto_record: config.auto_record,
            last_good: NormalizedCommand::default(),
            recording: false,
            prev_buttons: 0,
            fault_cycles: 0,
        }
    }

    /// Whether recording is currently toggled on.
    #[must_use]
    pub fn recording(&self) -> bool {
        self.recording
    }

    /// Maps this cycle's sample (or fault) to a human command.
    pub fn map(&mut self, sample: Result<RawSample, InputFault>) -> HumanInput {
        let sample = sample.and_then(|s| {
            if s.is_in_range() {
                Ok(s)
            } else {
                Err(InputFault::OutOfRange)
            }
        });

        match sample {
            Ok(sample) => self.map_sample(&sample),
            Err(fault) => self.map_fault(fault),
        }
    }

    fn map_sample(&mut self, sample: &RawSample) -> HumanInput {
        let recovering = self.fault_cycles > 0;
        if recovering {
            info!(
                "Gamepad input recovered after {} faulted cycles",
                self.fault_cycles
            );
            self.fault_cycles = 0;
            // Toggles held across the outage must not fire again. The
            // emergency bit keeps its pre-fault level so a press made
            // during the outage still fires.
            let toggles = buttons::RECORD | buttons::MODE;
            self.prev_buttons = (sample.buttons & toggles) | (self.prev_buttons & !toggles);
        }

        let pressed = sample.buttons & !self.prev_buttons;
        self.prev_buttons = sample.buttons;

        if pressed & buttons::RECORD != 0 {
            self.recording = !self.recording;
            info!(
                "Recording {}",
                if self.recording { "enabled" } else { "disabled" }
            );
        }

        let steering = if sample.dpad_x != 0 {
            f32::from(sample.dpad_x) * self.dpad_step
        } else {
            self.steering.apply(sample.axis_x)
        };

        let throttle = if sample.dpad_y != 0 {
            -f32::from(sample.dpad_y) * self.dpad_step
        } else {
            self.throttle.apply(sample.axis_y)
        };

        let mut command = NormalizedCommand::human(steering, sanitize(throttle) * self.max_throttle);
        command.recording = self.recording || (self.auto_record && command.throttle != 0.0);
        self.last_good = command;

        HumanInput {
            command,
            emergency_button: pressed & buttons::EMERGENCY != 0,
            emergency_held: sample.pressed(buttons::EMERGENCY),
            mode_toggle: pressed & buttons::MODE != 0,
            fault: None,
        }
    }

    fn map_fault(&mut self, fault: InputFault) -> HumanInput {
        self.fault_cycles = self.fault_cycles.saturating_add(1);

        let command = if self.fault_cycles <= self.hold_cycles {
            if self.fault_cycles == 1 {
                warn!("Gamepad input fault ({}), holding last command", fault);
            }
            self.last_good
        } else {
            if self.fault_cycles == self.hold_cycles.saturating_add(1) {
                error!(
                    "Gamepad input fault ({}) persisted for {} cycles, commanding neutral",
                    fault, self.fault_cycles
                );
            }
            let mut neutral = NormalizedCommand::neutral(self.last_good.source);
            neutral.recording = self.recording;
            neutral
        };

        HumanInput {
            command,
            fault: Some(fault),
            ..HumanInput::default()
        }
    }
}
