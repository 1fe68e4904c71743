//! Raspberry Pi GPIO backend built on `rppal`.
//!
//! PWM on the enable pins is software PWM, which is fine at the few-kHz
//! frequencies H-bridge drivers expect.

use std::time::Duration;

use rppal::gpio::{Gpio, InputPin, OutputPin, Trigger};
use tracing::{debug, info};

use super::{GpioBackend, GpioError, InputLine, Level, OutputLine, Pull, PwmLine};

/// Raspberry Pi GPIO bank (BCM numbering).
pub struct RpiGpio {
    gpio: Gpio,
}

impl std::fmt::Debug for RpiGpio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpiGpio").finish_non_exhaustive()
    }
}

impl RpiGpio {
    /// Opens `/dev/gpiomem`.
    ///
    /// # Errors
    ///
    /// Returns [`GpioError::Unavailable`] when not running on a Pi or without
    /// permission to access GPIO.
    pub fn new() -> Result<Self, GpioError> {
        let gpio = Gpio::new().map_err(|e| GpioError::Unavailable(e.to_string()))?;
        info!("Raspberry Pi GPIO opened");
        Ok(Self { gpio })
    }

    fn claim(&self, pin: u8) -> Result<rppal::gpio::Pin, GpioError> {
        self.gpio.get(pin).map_err(|e| GpioError::Pin {
            pin,
            reason: e.to_string(),
        })
    }
}

impl GpioBackend for RpiGpio {
    fn name(&self) -> &'static str {
        "rppal"
    }

    fn input(&mut self, pin: u8, pull: Pull) -> Result<Box<dyn InputLine>, GpioError> {
        let raw = self.claim(pin)?;
        let input = match pull {
            Pull::Up => raw.into_input_pullup(),
            Pull::Down => raw.into_input_pulldown(),
            Pull::None => raw.into_input(),
        };
        debug!("Claimed input pin {} ({:?})", pin, pull);
        Ok(Box::new(RpiInput {
            pin,
            input,
            interrupt_armed: false,
        }))
    }

    fn output(&mut self, pin: u8) -> Result<Box<dyn OutputLine>, GpioError> {
        let output = self.claim(pin)?.into_output_low();
        debug!("Claimed output pin {}", pin);
        Ok(Box::new(RpiOutput { pin, output }))
    }

    fn pwm(&mut self, pin: u8, frequency_hz: f64) -> Result<Box<dyn PwmLine>, GpioError> {
        let output = self.claim(pin)?.into_output_low();
        debug!("Claimed PWM pin {} at {} Hz", pin, frequency_hz);
        Ok(Box::new(RpiPwm {
            pin,
            output,
            frequency_hz,
        }))
    }
}

struct RpiInput {
    pin: u8,
    input: InputPin,
    interrupt_armed: bool,
}

fn level_from(level: rppal::gpio::Level) -> Level {
    match level {
        rppal::gpio::Level::Low => Level::Low,
        rppal::gpio::Level::High => Level::High,
    }
}

impl InputLine for RpiInput {
    fn read(&mut self) -> Result<Level, GpioError> {
        Ok(level_from(self.input.read()))
    }

    fn wait_for_edge(&mut self, timeout: Duration) -> Result<Option<Level>, GpioError> {
        if !self.interrupt_armed {
            self.input
                .set_interrupt(Trigger::Both)
                .map_err(|e| GpioError::Read {
                    pin: self.pin,
                    reason: e.to_string(),
                })?;
            self.interrupt_armed = true;
        }
        self.input
            .poll_interrupt(false, Some(timeout))
            .map(|edge| edge.map(level_from))
            .map_err(|e| GpioError::Read {
                pin: self.pin,
                reason: e.to_string(),
            })
    }
}

struct RpiOutput {
    pin: u8,
    output: OutputPin,
}

impl OutputLine for RpiOutput {
    fn write(&mut self, level: Level) -> Result<(), GpioError> {
        match level {
            Level::High => self.output.set_high(),
            Level::Low => self.output.set_low(),
        }
        Ok(())
    }
}

impl Drop for RpiOutput {
    fn drop(&mut self) {
        self.output.set_low();
        debug!("Released output pin {}", self.pin);
    }
}

struct RpiPwm {
    pin: u8,
    output: OutputPin,
    frequency_hz: f64,
}

impl PwmLine for RpiPwm {
    fn set_duty_cycle(&mut self, duty: f64) -> Result<(), GpioError> {
        let duty = duty.clamp(0.0, 1.0);
        let result = if duty <= 0.0 {
            self.output.clear_pwm().map(|()| self.output.set_low())
        } else {
            self.output.set_pwm_frequency(self.frequency_hz, duty)
        };
        result.map_err(|e| GpioError::Write {
            pin: self.pin,
            reason: e.to_string(),
        })
    }
}

impl Drop for RpiPwm {
    fn drop(&mut self) {
        // Best effort; the pin is reset by rppal on drop either way.
        let _ = self.output.clear_pwm();
        self.output.set_low();
        debug!("Released PWM pin {}", self.pin);
    }
}
