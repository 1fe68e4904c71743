//! # Calibration Module
//!
//! Applies deadzone and sensitivity scaling to normalized stick inputs.
//!
//! ## Deadzone
//!
//! A deadzone eliminates small stick movements near center to prevent drift.
//! Values strictly inside the deadzone are mapped to exactly 0.0. Values
//! outside it pass through unchanged, so a sample just past the edge is
//! not rescaled.
//!
//! ## Sensitivity
//!
//! After the deadzone the value is multiplied by the sensitivity and clamped
//! to -1.0..=1.0.
//!
//! ## Usage
//!
//! ```
//! use tracked_drive::controller::calibration::AxisShaping;
//!
//! let shaping = AxisShaping::new(0.05, 1.5);
//!
//! // Input near center (within deadzone)
//! assert_eq!(shaping.apply(0.02), 0.0);
//!
//! // Scaled and clamped
//! assert!((shaping.apply(0.4) - 0.6).abs() < 0.001);
//! assert_eq!(shaping.apply(0.9), 1.0);
//! ```

/// Deadzone and sensitivity for one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisShaping {
    /// Deadzone as a fraction (0.0 to 0.5).
    deadzone: f32,
    /// Multiplier applied after the deadzone.
    sensitivity: f32,
}

impl Default for AxisShaping {
    fn default() -> Self {
        Self {
            deadzone: 0.05,
            sensitivity: 1.0,
        }
    }
}

impl AxisShaping {
    /// Creates a new shaping. The deadzone is clamped to 0.0..=0.5 and a
    /// negative sensitivity is treated as zero.
    #[must_use]
    pub fn new(deadzone: f32, sensitivity: f32) -> Self {
        Self {
            deadzone: deadzone.clamp(0.0, 0.5),
            sensitivity: sensitivity.max(0.0),
        }
    }

    /// Creates a linear shaping (no deadzone, unit sensitivity).
    #[must_use]
    pub fn linear() -> Self {
        Self {
            deadzone: 0.0,
            sensitivity: 1.0,
        }
    }

    #[must_use]
    pub fn deadzone(&self) -> f32 {
        self.deadzone
    }

    #[must_use]
    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    /// Applies deadzone, then sensitivity, then clamps.
    ///
    /// NaN maps to 0.0.
    #[must_use]
    pub fn apply(&self, input: f32) -> f32 {
        if input.is_nan() || input.abs() < self.deadzone {
            return 0.0;
        }
        (input * self.sensitivity).clamp(-1.0, 1.0)
    }
}

/// Converts a raw axis value in `min..=max` to -1.0..=1.0.
///
/// Values outside the range map outside -1.0..=1.0; callers treat that as an
/// out-of-range sample.
///
/// # Examples
///
/// ```
/// use tracked_drive::controller::calibration::normalize_axis;
///
/// assert!((normalize_axis(0, 0, 255) - (-1.0)).abs() < 0.01);
/// assert!((normalize_axis(128, 0, 255) - 0.0).abs() < 0.01);
/// assert!((normalize_axis(255, 0, 255) - 1.0).abs() < 0.01);
/// assert!((normalize_axis(32767, -32768, 32767) - 1.0).abs() < 0.01);
/// ```
#[must_use]
pub fn normalize_axis(raw: i32, min: i32, max: i32) -> f32 {
    let span = (max as f32) - (min as f32);
    if span <= 0.0 {
        return 0.0;
    }
    let center = (min as f32) + span / 2.0;
    ((raw as f32) - center) / (span / 2.0)
}
