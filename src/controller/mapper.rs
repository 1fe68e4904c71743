//! # Gamepad Event Mapper Module
//!
//! This module folds raw evdev events from the gamepad into a [`PadState`]
//! and extracts one normalized [`RawSample`] per input report.
//!
//! ## Axis Codes (EV_ABS)
//!
//! | Axis | evdev Code | Range | Function |
//! |------|------------|-------|----------|
//! | Left Stick X | ABS_X | `axis_min..=axis_max` | Steering |
//! | Left Stick Y | ABS_Y | `axis_min..=axis_max` | Throttle |
//! | D-Pad X | ABS_HAT0X | -1/0/1 | Discrete steering |
//! | D-Pad Y | ABS_HAT0Y | -1/0/1 | Discrete throttle (up = -1) |
//!
//! ## Button Codes (EV_KEY)
//!
//! | Button | evdev Code | Function |
//! |--------|------------|----------|
//! | Cross / A | BTN_SOUTH | Toggle recording |
//! | PS / Home | BTN_MODE | Software emergency stop |
//! | Options / + | BTN_START | Toggle human/autonomous mode |
//!
//! ## Usage
//!
//! ```no_run
//! use tracked_drive::controller::mapper::{AxisRange, EventMapper};
//!
//! let mut mapper = EventMapper::new(AxisRange::default());
//! # let events: Vec<evdev::InputEvent> = Vec::new();
//! for event in &events {
//!     if mapper.process_event(event) {
//!         let sample = mapper.sample();
//!         // Hand the sample to the input mapper...
//!     }
//! }
//! ```

use evdev::{AbsoluteAxisType, InputEvent, InputEventKind, Key, Synchronization};

use super::calibration::normalize_axis;

/// Bit masks for [`RawSample::buttons`].
pub mod buttons {
    /// Recording toggle - BTN_SOUTH
    pub const RECORD: u16 = 1 << 0;
    /// Software emergency stop - BTN_MODE
    pub const EMERGENCY: u16 = 1 << 1;
    /// Drive mode toggle - BTN_START
    pub const MODE: u16 = 1 << 2;
}

/// Raw stick range reported by the device, and the throttle convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    pub min: i32,
    pub max: i32,
    /// Stick pushed up reports low values (true for most gamepads).
    pub invert_y: bool,
}

impl Default for AxisRange {
    fn default() -> Self {
        Self {
            min: 0,
            max: 255,
            invert_y: true,
        }
    }
}

/// One sample from the input device, already normalized.
///
/// `axis_y` is positive for "forward". D-pad values are -1, 0 or 1 in evdev
/// convention (up is -1).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawSample {
    pub axis_x: f32,
    pub axis_y: f32,
    pub dpad_x: i8,
    pub dpad_y: i8,
    pub buttons: u16,
}

impl RawSample {
    /// Checks whether a button bit is held.
    #[must_use]
    pub fn pressed(&self, mask: u16) -> bool {
        self.buttons & mask != 0
    }

    /// Returns `true` if both axes are finite and within `-1.0..=1.0`.
    #[must_use]
    pub fn is_in_range(&self) -> bool {
        let ok = |v: f32| v.is_finite() && (-1.0..=1.0).contains(&v);
        ok(self.axis_x) && ok(self.axis_y) && (-1..=1).contains(&self.dpad_x) && (-1..=1).contains(&self.dpad_y)
    }
}

/// Raw state of the inputs the drive cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadState {
    pub stick_x: i32,
    pub stick_y: i32,
    pub dpad_x: i32,
    pub dpad_y: i32,
    pub btn_south: bool,
    pub btn_mode: bool,
    pub btn_start: bool,
}

impl PadState {
    fn centered(range: &AxisRange) -> Self {
        let center = range.min + (range.max - range.min) / 2;
        Self {
            stick_x: center,
            stick_y: center,
            dpad_x: 0,
            dpad_y: 0,
            btn_south: false,
            btn_mode: false,
            btn_start: false,
        }
    }
}

/// Parses raw evdev events and maintains pad state.
///
/// `EventMapper` is not thread-safe. Use from a single task only.
#[derive(Debug)]
pub struct EventMapper {
    range: AxisRange,
    state: PadState,
}

impl Default for EventMapper {
    fn default() -> Self {
        Self::new(AxisRange::default())
    }
}

impl EventMapper {
    #[must_use]
    pub fn new(range: AxisRange) -> Self {
        Self {
            state: PadState::centered(&range),
            range,
        }
    }

    #[must_use]
    pub fn state(&self) -> &PadState {
        &self.state
    }

    /// Processes a single evdev input event.
    ///
    /// Returns `true` when the event closes a report (`SYN_REPORT`), which is
    /// when a consistent sample can be taken.
    pub fn process_event(&mut self, event: &InputEvent) -> bool {
        match event.kind() {
            InputEventKind::AbsAxis(axis) => {
                self.process_axis_event(axis, event.value());
                false
            }
            InputEventKind::Key(key) => {
                self.process_key_event(key, event.value() != 0);
                false
            }
            InputEventKind::Synchronization(sync) => sync == Synchronization::SYN_REPORT,
            _ => false,
        }
    }

    fn process_axis_event(&mut self, axis: AbsoluteAxisType, value: i32) {
        match axis {
            AbsoluteAxisType::ABS_X => self.state.stick_x = value,
            AbsoluteAxisType::ABS_Y => self.state.stick_y = value,
            AbsoluteAxisType::ABS_HAT0X => self.state.dpad_x = value,
            AbsoluteAxisType::ABS_HAT0Y => self.state.dpad_y = value,
            _ => {
                // Right stick, triggers, motion sensors
            }
        }
    }

    fn process_key_event(&mut self, key: Key, pressed: bool) {
        match key {
            Key::BTN_SOUTH => self.state.btn_south = pressed,
            Key::BTN_MODE => self.state.btn_mode = pressed,
            Key::BTN_START => self.state.btn_start = pressed,
            _ => {}
        }
    }

    /// Normalized sample of the current state.
    #[must_use]
    pub fn sample(&self) -> RawSample {
        let axis_x = normalize_axis(self.state.stick_x, self.range.min, self.range.max);
        let mut axis_y = normalize_axis(self.state.stick_y, self.range.min, self.range.max);
        if self.range.invert_y {
            axis_y = -axis_y;
        }

        let mut bits = 0;
        if self.state.btn_south {
            bits |= buttons::RECORD;
        }
        if self.state.btn_mode {
            bits |= buttons::EMERGENCY;
        }
        if self.state.btn_start {
            bits |= buttons::MODE;
        }

        RawSample {
            axis_x,
            axis_y,
            dpad_x: self.state.dpad_x.clamp(-1, 1) as i8,
            dpad_y: self.state.dpad_y.clamp(-1, 1) as i8,
            buttons: bits,
        }
    }

    /// Resets all state to centered sticks and released buttons.
    pub fn reset(&mut self) {
        self.state = PadState::centered(&self.range);
    }
}
