//! # Gamepad Module
//!
//! This module handles gamepad detection, connection and input reading using
//! the Linux evdev interface.
//!
//! ## Controller Detection
//!
//! Any event device exposing `ABS_X`, `ABS_Y` and `BTN_SOUTH` is accepted:
//! DualSense, Switch Pro and most XInput-style pads qualify. A configured
//! device path skips the scan.
//!
//! ## Reader Task
//!
//! Events are read on a tokio task and folded by an
//! [`EventMapper`](super::mapper::EventMapper). Every `SYN_REPORT` publishes a
//! fresh sample on a `watch` channel, so the control loop never blocks on the
//! device.

use std::path::Path;
use std::time::{Duration, Instant};

use evdev::{AbsoluteAxisType, Device, Key};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::mapper::{AxisRange, EventMapper, RawSample};
use super::{InputFault, SampleSource};
use crate::error::{DriveError, Result};

/// Gamepad handle
///
/// Represents an open evdev device that looks like a gamepad.
pub struct Gamepad {
    device: Device,
    device_path: String,
}

impl std::fmt::Debug for Gamepad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gamepad")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

fn looks_like_gamepad(device: &Device) -> bool {
    let has_sticks = device.supported_absolute_axes().map_or(false, |axes| {
        axes.contains(AbsoluteAxisType::ABS_X) && axes.contains(AbsoluteAxisType::ABS_Y)
    });
    let has_face_button = device
        .supported_keys()
        .map_or(false, |keys| keys.contains(Key::BTN_SOUTH));
    has_sticks && has_face_button
}

impl Gamepad {
    /// Opens the configured device, or scans for the first gamepad when
    /// `device_path` is empty.
    ///
    /// # Errors
    ///
    /// - `ControllerNotFound`: No gamepad found on the system
    /// - `Controller`: The configured device could not be opened or is not a gamepad
    pub fn open(device_path: &str) -> Result<Self> {
        if device_path.is_empty() {
            Self::scan()
        } else {
            Self::open_path(device_path)
        }
    }

    /// Opens a specific event device.
    pub fn open_path(path: &str) -> Result<Self> {
        let device = Device::open(path)
            .map_err(|e| DriveError::Controller(format!("Failed to open {}: {}", path, e)))?;
        if !looks_like_gamepad(&device) {
            return Err(DriveError::Controller(format!(
                "{} does not report sticks and face buttons",
                path
            )));
        }
        info!(
            "Opened gamepad {:?} at {}",
            device.name().unwrap_or("unknown"),
            path
        );
        Ok(Self {
            device,
            device_path: path.to_string(),
        })
    }

    /// Detect and open the first available gamepad
    ///
    /// Scans all `/dev/input/event*` devices in sorted order.
    pub fn scan() -> Result<Self> {
        let input_dir = Path::new("/dev/input");

        if !input_dir.exists() {
            return Err(DriveError::Controller(
                "/dev/input directory not found".to_string(),
            ));
        }

        let mut entries: Vec<_> = std::fs::read_dir(input_dir)
            .map_err(|e| DriveError::Controller(format!("Failed to read /dev/input: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DriveError::Controller(format!("Failed to read directory entry: {}", e)))?;

        // Sort entries for deterministic device selection when multiple pads are connected
        entries.sort_by_key(|entry| entry.path());

        for entry in entries {
            let path = entry.path();

            let is_event_node = path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with("event"));
            if !is_event_node {
                continue;
            }

            match Device::open(&path) {
                Ok(device) => {
                    debug!(
                        "Found input device: {} ({:?})",
                        path.display(),
                        device.name()
                    );
                    if looks_like_gamepad(&device) {
                        let device_path = path.to_string_lossy().to_string();
                        info!(
                            "Found gamepad {:?} at: {}",
                            device.name().unwrap_or("unknown"),
                            device_path
                        );
                        return Ok(Gamepad {
                            device,
                            device_path,
                        });
                    }
                }
                Err(e) => {
                    // Permission denied or other errors - skip device
                    debug!("Could not open {}: {}", path.display(), e);
                }
            }
        }

        Err(DriveError::ControllerNotFound)
    }

    /// Get the device path of this gamepad
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Human-readable device name reported by the kernel
    pub fn name(&self) -> Option<&str> {
        self.device.name()
    }

    /// Starts the reader task and returns the sample source fed by it.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Controller` if the device cannot be switched to async mode.
    pub fn spawn_reader(self, range: AxisRange, read_timeout: Option<Duration>) -> Result<GamepadSource> {
        let device_path = self.device_path;
        let mut stream = self.device.into_event_stream().map_err(|e| {
            DriveError::Controller(format!("Failed to stream {}: {}", device_path, e))
        })?;

        let (tx, rx) = watch::channel(Feed::Sample {
            sample: EventMapper::new(range).sample(),
            at: Instant::now(),
        });

        let path = device_path.clone();
        let task = tokio::spawn(async move {
            let mut mapper = EventMapper::new(range);
            loop {
                match stream.next_event().await {
                    Ok(event) => {
                        if mapper.process_event(&event) {
                            let feed = Feed::Sample {
                                sample: mapper.sample(),
                                at: Instant::now(),
                            };
                            if tx.send(feed).is_err() {
                                debug!("Gamepad reader for {} has no consumer, stopping", path);
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Gamepad at {} disconnected: {}", path, e);
                        tx.send_replace(Feed::Lost);
                        break;
                    }
                }
            }
        });

        Ok(GamepadSource {
            rx,
            read_timeout,
            device_path,
            task,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Feed {
    Sample { sample: RawSample, at: Instant },
    Lost,
}

/// [`SampleSource`] backed by a gamepad reader task.
#[derive(Debug)]
pub struct GamepadSource {
    rx: watch::Receiver<Feed>,
    read_timeout: Option<Duration>,
    device_path: String,
    task: JoinHandle<()>,
}

impl GamepadSource {
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

impl SampleSource for GamepadSource {
    fn read_sample(&mut self, now: Instant) -> std::result::Result<RawSample, InputFault> {
        match *self.rx.borrow() {
            Feed::Lost => Err(InputFault::Disconnected),
            Feed::Sample { sample, at } => match self.read_timeout {
                Some(timeout) if now.saturating_duration_since(at) > timeout => {
                    Err(InputFault::Timeout)
                }
                _ => Ok(sample),
            },
        }
    }
}

impl Drop for GamepadSource {
    fn drop(&mut self) {
        self.task.abort();
    }
}
