//! In-memory GPIO backend.
//!
//! Every clone of a [`SimulatedGpio`] shares the same pin table, so a test can
//! keep one clone to drive inputs and inspect outputs while the drive core owns
//! the lines it claimed from another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{GpioBackend, GpioError, InputLine, Level, OutputLine, Pull, PwmLine};

/// Poll period of [`InputLine::wait_for_edge`] on simulated pins.
const EDGE_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Default)]
struct SimPin {
    level: Level,
    duty: f64,
    pwm_frequency_hz: Option<f64>,
    claimed: bool,
    fail_writes: bool,
    fail_reads: bool,
}

/// Simulated GPIO bank.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGpio {
    pins: Arc<Mutex<HashMap<u8, SimPin>>>,
}

impl SimulatedGpio {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u8, SimPin>> {
        lock_pins(&self.pins)
    }

    /// Drives an input pin from outside, as wiring would.
    pub fn set_level(&self, pin: u8, level: Level) {
        self.lock().entry(pin).or_default().level = level;
    }

    /// Current level of a pin, if it was ever touched.
    #[must_use]
    pub fn level(&self, pin: u8) -> Option<Level> {
        self.lock().get(&pin).map(|p| p.level)
    }

    /// Current PWM duty of a pin, if it was ever touched.
    #[must_use]
    pub fn duty(&self, pin: u8) -> Option<f64> {
        self.lock().get(&pin).map(|p| p.duty)
    }

    /// PWM frequency a pin was claimed with.
    #[must_use]
    pub fn pwm_frequency(&self, pin: u8) -> Option<f64> {
        self.lock().get(&pin).and_then(|p| p.pwm_frequency_hz)
    }

    /// Returns `true` while a line holds the pin.
    #[must_use]
    pub fn is_claimed(&self, pin: u8) -> bool {
        self.lock().get(&pin).is_some_and(|p| p.claimed)
    }

    /// Makes every write to `pin` fail until cleared.
    pub fn set_fail_writes(&self, pin: u8, fail: bool) {
        self.lock().entry(pin).or_default().fail_writes = fail;
    }

    /// Makes every read of `pin` fail until cleared.
    pub fn set_fail_reads(&self, pin: u8, fail: bool) {
        self.lock().entry(pin).or_default().fail_reads = fail;
    }

    fn claim(&self, pin: u8, initial: impl FnOnce(&mut SimPin)) -> Result<(), GpioError> {
        let mut pins = self.lock();
        let entry = pins.entry(pin).or_default();
        if entry.claimed {
            return Err(GpioError::Pin {
                pin,
                reason: "already claimed".to_string(),
            });
        }
        entry.claimed = true;
        initial(entry);
        Ok(())
    }
}

fn lock_pins(pins: &Mutex<HashMap<u8, SimPin>>) -> MutexGuard<'_, HashMap<u8, SimPin>> {
    pins.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GpioBackend for SimulatedGpio {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn input(&mut self, pin: u8, pull: Pull) -> Result<Box<dyn InputLine>, GpioError> {
        // An untouched pin rests at its bias level.
        let fresh = !self.lock().contains_key(&pin);
        self.claim(pin, |p| {
            if fresh {
                p.level = pull.idle_level();
            }
        })?;
        Ok(Box::new(SimLine {
            pin,
            pins: Arc::clone(&self.pins),
        }))
    }

    fn output(&mut self, pin: u8) -> Result<Box<dyn OutputLine>, GpioError> {
        self.claim(pin, |p| p.level = Level::Low)?;
        Ok(Box::new(SimLine {
            pin,
            pins: Arc::clone(&self.pins),
        }))
    }

    fn pwm(&mut self, pin: u8, frequency_hz: f64) -> Result<Box<dyn PwmLine>, GpioError> {
        self.claim(pin, |p| {
            p.level = Level::Low;
            p.duty = 0.0;
            p.pwm_frequency_hz = Some(frequency_hz);
        })?;
        Ok(Box::new(SimLine {
            pin,
            pins: Arc::clone(&self.pins),
        }))
    }
}

/// A claimed simulated pin, usable as input, output or PWM.
struct SimLine {
    pin: u8,
    pins: Arc<Mutex<HashMap<u8, SimPin>>>,
}

impl SimLine {
    fn current_level(&self) -> Level {
        lock_pins(&self.pins)
            .get(&self.pin)
            .map(|p| p.level)
            .unwrap_or_default()
    }

    fn with_writable<F: FnOnce(&mut SimPin)>(&mut self, f: F) -> Result<(), GpioError> {
        let mut pins = lock_pins(&self.pins);
        let entry = pins.entry(self.pin).or_default();
        if entry.fail_writes {
            return Err(GpioError::Write {
                pin: self.pin,
                reason: "simulated write failure".to_string(),
            });
        }
        f(entry);
        Ok(())
    }
}

impl InputLine for SimLine {
    fn read(&mut self) -> Result<Level, GpioError> {
        let pins = lock_pins(&self.pins);
        match pins.get(&self.pin) {
            Some(p) if p.fail_reads => Err(GpioError::Read {
                pin: self.pin,
                reason: "simulated read failure".to_string(),
            }),
            Some(p) => Ok(p.level),
            None => Ok(Level::default()),
        }
    }

    fn wait_for_edge(&mut self, timeout: Duration) -> Result<Option<Level>, GpioError> {
        let start = Instant::now();
        let initial = self.current_level();
        while start.elapsed() < timeout {
            std::thread::sleep(EDGE_POLL_INTERVAL.min(timeout));
            let level = self.current_level();
            if level != initial {
                return Ok(Some(level));
            }
        }
        Ok(None)
    }
}

impl OutputLine for SimLine {
    fn write(&mut self, level: Level) -> Result<(), GpioError> {
        self.with_writable(|p| p.level = level)
    }
}

impl PwmLine for SimLine {
    fn set_duty_cycle(&mut self, duty: f64) -> Result<(), GpioError> {
        let duty = duty.clamp(0.0, 1.0);
        self.with_writable(|p| {
            p.duty = duty;
            p.level = Level::from(duty > 0.0);
        })
    }
}

impl Drop for SimLine {
    fn drop(&mut self) {
        if let Some(p) = lock_pins(&self.pins).get_mut(&self.pin) {
            p.claimed = false;
        }
    }
}
