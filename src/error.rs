//! # Error Types
//!
//! Custom error types for Tracked Drive using `thiserror`.

use thiserror::Error;

use crate::command::Side;
use crate::gpio::GpioError;

/// Main error type for Tracked Drive
#[derive(Debug, Error)]
pub enum DriveError {
    /// Configuration errors (parse and validation)
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Gamepad errors
    #[error("Controller error: {0}")]
    Controller(String),

    /// No usable gamepad on the system
    #[error("No gamepad found under /dev/input")]
    ControllerNotFound,

    /// GPIO setup errors
    #[error("GPIO error: {0}")]
    Gpio(#[from] GpioError),

    /// A motor write failed during this cycle only
    #[error("Actuation fault on {side} motor: {source}")]
    Actuation {
        side: Side,
        #[source]
        source: GpioError,
    },

    /// Actuation kept failing; the control loop must shut down
    #[error("Actuation failed for {consecutive} consecutive cycles: {source}")]
    ActuationFatal {
        consecutive: u32,
        #[source]
        source: GpioError,
    },
}

impl DriveError {
    /// Returns `true` if the orchestrator must stop driving.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DriveError::Actuation { .. })
    }
}

/// Result type alias for Tracked Drive
pub type Result<T> = std::result::Result<T, DriveError>;
