//! # Emergency Stop Monitor
//!
//! Debounced state machine over the hardware stop button and the optional
//! reset button.
//!
//! ```text
//!            stop pressed for debounce_ms
//!   IDLE ─────────────────────────────────▶ TRIGGERED
//!    ▲                                          │ immediately
//!    │  stop released and                       ▼
//!    └── (no reset pin, or reset pressed ── LATCHED_AWAITING_RESET
//!         for reset_debounce_ms)
//! ```
//!
//! Only a reset press that completes after the latch counts. A reset button
//! already held when the stop latches must be released and pressed again.
//!
//! The monitor is the only writer of its [`StopState`]. It is either sampled
//! from the control tick ([`EmergencyStopMonitor::sample`]) or moved onto a
//! watcher thread that wakes on pin edges ([`EmergencyStopMonitor::spawn_watcher`]).
//!
//! Without GPIO the monitor runs as a stub that never triggers from hardware
//! and reports itself degraded through [`StopState::is_degraded`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::debounce::Debouncer;
use super::state::{StopPhase, StopState};
use crate::config::EmergencyConfig;
use crate::error::Result;
use crate::gpio::{GpioBackend, GpioError, InputLine, Level};

/// Longest the watcher thread blocks waiting for an edge.
const WATCH_IDLE_TIMEOUT: Duration = Duration::from_millis(50);
/// Polling cap while a reset pin must be watched alongside the stop pin.
const WATCH_RESET_POLL: Duration = Duration::from_millis(10);

/// Transition reported by [`EmergencyStopMonitor::sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopEvent {
    /// Stop accepted; the state is now latched.
    Triggered,
    /// Latch cleared; driving may resume.
    Reset,
}

struct Button {
    line: Box<dyn InputLine>,
    pin: u8,
    debouncer: Debouncer,
    read_failing: bool,
}

impl Button {
    /// Reads and debounces. `on_error` is the value assumed for a failed read.
    fn update(&mut self, pressed_level: Level, on_error: bool, now: Instant) {
        let raw = match self.line.read() {
            Ok(level) => {
                if self.read_failing {
                    info!("Pin {} readable again", self.pin);
                    self.read_failing = false;
                }
                level == pressed_level
            }
            Err(e) => {
                if !self.read_failing {
                    warn!("Pin {} read failed, assuming pressed={}: {}", self.pin, on_error, e);
                    self.read_failing = true;
                }
                on_error
            }
        };
        self.debouncer.update(raw, now);
    }

    fn pressed(&self) -> bool {
        self.debouncer.stable()
    }
}

/// Hardware emergency-stop monitor.
pub struct EmergencyStopMonitor {
    stop: Option<Button>,
    reset: Option<Button>,
    pressed_level: Level,
    phase: StopPhase,
    forced: bool,
    /// Reset button seen released since the latch.
    reset_armed: bool,
    state: Arc<StopState>,
}

impl std::fmt::Debug for EmergencyStopMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyStopMonitor")
            .field("stop_pin", &self.stop.as_ref().map(|b| b.pin))
            .field("reset_pin", &self.reset.as_ref().map(|b| b.pin))
            .field("phase", &self.phase)
            .field("forced", &self.forced)
            .finish_non_exhaustive()
    }
}

impl EmergencyStopMonitor {
    /// Claims the stop (and reset) pins from `backend`.
    ///
    /// Never fails: with no backend, or if a pin cannot be claimed, the
    /// monitor comes up degraded.
    pub fn open(backend: Option<&mut dyn GpioBackend>, config: &EmergencyConfig) -> Self {
        let Some(backend) = backend else {
            error!(
                "No GPIO for emergency stop pin {}: hardware e-stop DISABLED",
                config.stop_pin
            );
            return Self::degraded();
        };

        match Self::claim(backend, config) {
            Ok((stop, reset)) => {
                info!(
                    "Emergency stop on pin {} (reset pin {:?}, pressed={:?}, debounce {} ms) via {}",
                    config.stop_pin,
                    config.reset_pin,
                    !config.pull().idle_level(),
                    config.debounce_ms,
                    backend.name()
                );
                Self::new(stop, reset, config)
            }
            Err(e) => {
                error!("Emergency stop GPIO unavailable ({}): hardware e-stop DISABLED", e);
                Self::degraded()
            }
        }
    }

    fn claim(
        backend: &mut dyn GpioBackend,
        config: &EmergencyConfig,
    ) -> std::result::Result<(Box<dyn InputLine>, Option<Box<dyn InputLine>>), GpioError> {
        let stop = backend.input(config.stop_pin, config.pull())?;
        let reset = config
            .reset_pin
            .map(|pin| backend.input(pin, config.pull()))
            .transpose()?;
        Ok((stop, reset))
    }

    /// Builds a monitor over already-claimed lines.
    pub fn new(
        stop: Box<dyn InputLine>,
        reset: Option<Box<dyn InputLine>>,
        config: &EmergencyConfig,
    ) -> Self {
        Self {
            stop: Some(Button {
                line: stop,
                pin: config.stop_pin,
                debouncer: Debouncer::new(false, config.debounce()),
                read_failing: false,
            }),
            reset: reset.map(|line| Button {
                line,
                pin: config.reset_pin.unwrap_or_default(),
                debouncer: Debouncer::new(false, config.reset_debounce()),
                read_failing: false,
            }),
            // Pull-up wiring: the button shorts the pin to ground
            pressed_level: !config.pull().idle_level(),
            phase: StopPhase::Idle,
            forced: false,
            reset_armed: false,
            state: Arc::new(StopState::new()),
        }
    }

    /// Permanently idle stub for when no GPIO is available.
    #[must_use]
    pub fn degraded() -> Self {
        let state = Arc::new(StopState::new());
        state.mark_degraded();
        Self {
            stop: None,
            reset: None,
            pressed_level: Level::Low,
            phase: StopPhase::Idle,
            forced: false,
            reset_armed: false,
            state,
        }
    }

    /// Shared handle for readers.
    #[must_use]
    pub fn state(&self) -> Arc<StopState> {
        Arc::clone(&self.state)
    }

    #[must_use]
    pub fn phase(&self) -> StopPhase {
        self.phase
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.stop.is_none()
    }

    /// Samples the pins once and advances the state machine.
    pub fn sample(&mut self, now: Instant) -> Option<StopEvent> {
        let stop = self.stop.as_mut()?;
        // A stop pin that cannot be read counts as pressed; a reset pin does not.
        stop.update(self.pressed_level, true, now);
        let mut settling = stop.debouncer.is_settling();
        let stop_pressed = stop.pressed();

        if let Some(reset) = self.reset.as_mut() {
            reset.update(self.pressed_level, false, now);
            settling |= reset.debouncer.is_settling();
        }
        self.state.set_settling(settling);

        if self.phase == StopPhase::LatchedAwaitingReset && !self.reset_armed {
            if let Some(reset) = self.reset.as_ref().filter(|b| !b.pressed()) {
                debug!("Reset pin {} released, reset armed", reset.pin);
                self.reset_armed = true;
            }
        }

        match self.phase {
            StopPhase::Idle if stop_pressed => {
                self.latch(now);
                error!("EMERGENCY STOP triggered by hardware button");
                Some(StopEvent::Triggered)
            }
            StopPhase::LatchedAwaitingReset if !stop_pressed && !self.forced => {
                let reset_ok = self
                    .reset
                    .as_ref()
                    .map_or(true, |b| self.reset_armed && b.pressed());
                if reset_ok {
                    self.set_phase(StopPhase::Idle, now);
                    info!("Emergency stop reset, driving may resume");
                    Some(StopEvent::Reset)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Latches the stop from software.
    ///
    /// A forced latch is only cleared by [`force_reset`](Self::force_reset).
    pub fn force_trigger(&mut self, now: Instant) -> Option<StopEvent> {
        self.forced = true;
        if self.phase.is_active() {
            return None;
        }
        self.latch(now);
        error!("EMERGENCY STOP triggered from software");
        Some(StopEvent::Triggered)
    }

    /// Clears a latch from software.
    ///
    /// Refused while the hardware stop button is still held down.
    pub fn force_reset(&mut self, now: Instant) -> Option<StopEvent> {
        if !self.phase.is_active() {
            self.forced = false;
            return None;
        }
        if self.stop.as_ref().is_some_and(Button::pressed) {
            warn!("Emergency stop reset refused: stop button still pressed");
            return None;
        }
        self.forced = false;
        self.set_phase(StopPhase::Idle, now);
        info!("Emergency stop reset from software");
        Some(StopEvent::Reset)
    }

    fn latch(&mut self, now: Instant) {
        self.reset_armed = false;
        // Readers must see the stop before any reset logic runs
        self.set_phase(StopPhase::Triggered, now);
        self.set_phase(StopPhase::LatchedAwaitingReset, now);
    }

    fn set_phase(&mut self, phase: StopPhase, now: Instant) {
        debug!("Emergency stop {} -> {}", self.phase, phase);
        self.phase = phase;
        self.state.set_phase(phase, now);
    }

    /// Time the watcher should block before the next sample.
    fn next_wait(&self, now: Instant) -> Duration {
        let pending = self
            .stop
            .iter()
            .chain(self.reset.iter())
            .filter_map(|b| b.debouncer.remaining(now))
            .min();

        let mut wait = pending.map_or(WATCH_IDLE_TIMEOUT, |d| d.max(Duration::from_millis(1)));
        if self.reset.is_some() {
            wait = wait.min(WATCH_RESET_POLL);
        }
        wait
    }

    /// Moves the monitor onto a dedicated thread that samples on every edge
    /// of the stop pin and whenever a debounce window is due.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the thread cannot be spawned.
    pub fn spawn_watcher(mut self) -> Result<StopWatcher> {
        let state = self.state();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = std::thread::Builder::new()
            .name("estop-watcher".to_string())
            .spawn(move || {
                debug!("Emergency stop watcher started");
                while flag.load(Ordering::Acquire) {
                    let wait = self.next_wait(Instant::now());
                    match self.stop.as_mut() {
                        Some(stop) => {
                            if let Err(e) = stop.line.wait_for_edge(wait) {
                                debug!("Edge wait on pin {} failed: {}", stop.pin, e);
                                std::thread::sleep(WATCH_RESET_POLL);
                            }
                        }
                        None => std::thread::sleep(wait),
                    }
                    self.sample(Instant::now());
                }
                debug!("Emergency stop watcher stopped");
                self
            })?;

        Ok(StopWatcher {
            state,
            running,
            handle: Some(handle),
        })
    }
}

/// Handle to a monitor running on its watcher thread.
#[derive(Debug)]
pub struct StopWatcher {
    state: Arc<StopState>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<EmergencyStopMonitor>>,
}

impl StopWatcher {
    #[must_use]
    pub fn state(&self) -> Arc<StopState> {
        Arc::clone(&self.state)
    }

    /// Stops the thread and hands the monitor back.
    pub fn stop(mut self) -> Option<EmergencyStopMonitor> {
        self.join()
    }

    fn join(&mut self) -> Option<EmergencyStopMonitor> {
        self.running.store(false, Ordering::Release);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(monitor) => Some(monitor),
            Err(_) => {
                error!("Emergency stop watcher thread panicked");
                None
            }
        }
    }
}

impl Drop for StopWatcher {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::SimulatedGpio;

    const STOP: u8 = 26;
    const RESET: u8 = 16;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn config(reset_pin: Option<u8>) -> EmergencyConfig {
        EmergencyConfig {
            reset_pin,
            ..EmergencyConfig::default()
        }
    }

    fn open(reset_pin: Option<u8>) -> (SimulatedGpio, EmergencyStopMonitor) {
        let mut gpio = SimulatedGpio::new();
        let probe = gpio.clone();
        let monitor = EmergencyStopMonitor::open(Some(&mut gpio), &config(reset_pin));
        (probe, monitor)
    }

    /// Samples every 10 ms from `start` for `duration`, returning events seen.
    fn run(monitor: &mut EmergencyStopMonitor, start: Instant, duration: u64) -> Vec<StopEvent> {
        (0..=duration / 10)
            .filter_map(|i| monitor.sample(start + ms(i * 10)))
            .collect()
    }

    // ==================== State Machine Tests ====================

    #[test]
    fn test_idle_at_startup() {
        let (_gpio, mut monitor) = open(None);
        assert_eq!(monitor.sample(Instant::now()), None);
        assert_eq!(monitor.phase(), StopPhase::Idle);
        assert!(!monitor.is_degraded());
        assert!(!monitor.state().is_degraded());
    }

    #[test]
    fn test_press_latches_after_debounce() {
        let (gpio, mut monitor) = open(None);
        let state = monitor.state();
        let t0 = Instant::now();

        // Pull-up wiring: pressed reads low
        gpio.set_level(STOP, Level::Low);
        assert_eq!(monitor.sample(t0), None);
        assert_eq!(monitor.sample(t0 + ms(99)), None);
        assert!(!state.is_active());
        assert!(!state.status().debounced);

        assert_eq!(monitor.sample(t0 + ms(100)), Some(StopEvent::Triggered));
        assert_eq!(monitor.phase(), StopPhase::LatchedAwaitingReset);
        assert!(state.is_active());
        assert_eq!(state.last_transition().map(|t| t <= t0 + ms(100)), Some(true));
    }

    #[test]
    fn test_noisy_read_does_not_trigger() {
        let (gpio, mut monitor) = open(None);
        let t0 = Instant::now();
        for i in 0..50u64 {
            let level = if i % 2 == 0 { Level::Low } else { Level::High };
            gpio.set_level(STOP, level);
            assert_eq!(monitor.sample(t0 + ms(i * 20)), None);
        }
        assert_eq!(monitor.phase(), StopPhase::Idle);
    }

    #[test]
    fn test_release_resets_without_reset_pin() {
        let (gpio, mut monitor) = open(None);
        let t0 = Instant::now();
        gpio.set_level(STOP, Level::Low);
        assert_eq!(run(&mut monitor, t0, 150), vec![StopEvent::Triggered]);

        gpio.set_level(STOP, Level::High);
        let events = run(&mut monitor, t0 + ms(200), 150);
        assert_eq!(events, vec![StopEvent::Reset]);
        assert!(!monitor.state().is_active());
    }

    #[test]
    fn test_reset_pin_required() {
        let (gpio, mut monitor) = open(Some(RESET));
        let t0 = Instant::now();
        gpio.set_level(STOP, Level::Low);
        run(&mut monitor, t0, 150);
        assert!(monitor.state().is_active());

        // Releasing the stop alone is not enough
        gpio.set_level(STOP, Level::High);
        assert!(run(&mut monitor, t0 + ms(200), 1000).is_empty());
        assert_eq!(monitor.phase(), StopPhase::LatchedAwaitingReset);

        // Reset pressed, but only briefly
        gpio.set_level(RESET, Level::Low);
        monitor.sample(t0 + ms(1300));
        gpio.set_level(RESET, Level::High);
        assert!(run(&mut monitor, t0 + ms(1350), 300).is_empty());

        // Reset held through its debounce window
        gpio.set_level(RESET, Level::Low);
        let events = run(&mut monitor, t0 + ms(1700), 150);
        assert_eq!(events, vec![StopEvent::Reset]);
    }

    #[test]
    fn test_reset_held_before_latch_does_not_reset() {
        let (gpio, mut monitor) = open(Some(RESET));
        let t0 = Instant::now();
        gpio.set_level(RESET, Level::Low);
        assert!(run(&mut monitor, t0, 190).is_empty());

        gpio.set_level(STOP, Level::Low);
        assert_eq!(run(&mut monitor, t0 + ms(200), 190), vec![StopEvent::Triggered]);

        // Stop released with the reset still held from before the latch
        gpio.set_level(STOP, Level::High);
        assert!(run(&mut monitor, t0 + ms(400), 1000).is_empty());
        assert_eq!(monitor.phase(), StopPhase::LatchedAwaitingReset);

        // Release, then a fresh press clears it
        gpio.set_level(RESET, Level::High);
        assert!(run(&mut monitor, t0 + ms(1500), 190).is_empty());
        gpio.set_level(RESET, Level::Low);
        assert_eq!(run(&mut monitor, t0 + ms(1700), 150), vec![StopEvent::Reset]);
    }

    #[test]
    fn test_reset_ignored_while_stop_held() {
        let (gpio, mut monitor) = open(Some(RESET));
        let t0 = Instant::now();
        gpio.set_level(STOP, Level::Low);
        gpio.set_level(RESET, Level::Low);
        let events = run(&mut monitor, t0, 500);
        assert_eq!(events, vec![StopEvent::Triggered]);
        assert!(monitor.state().is_active());
    }

    #[test]
    fn test_read_error_treated_as_pressed() {
        let (gpio, mut monitor) = open(None);
        let t0 = Instant::now();
        gpio.set_fail_reads(STOP, true);
        assert_eq!(run(&mut monitor, t0, 150), vec![StopEvent::Triggered]);
    }

    #[test]
    fn test_pull_down_polarity() {
        let mut gpio = SimulatedGpio::new();
        let probe = gpio.clone();
        let config = EmergencyConfig {
            pull_up: false,
            ..EmergencyConfig::default()
        };
        let mut monitor = EmergencyStopMonitor::open(Some(&mut gpio), &config);
        let t0 = Instant::now();
        assert!(run(&mut monitor, t0, 200).is_empty());

        probe.set_level(STOP, Level::High);
        assert_eq!(run(&mut monitor, t0 + ms(300), 150), vec![StopEvent::Triggered]);
    }

    // ==================== Degraded Mode Tests ====================

    #[test]
    fn test_no_backend_is_degraded() {
        let mut monitor = EmergencyStopMonitor::open(None, &config(None));
        assert!(monitor.is_degraded());
        assert!(monitor.state().is_degraded());
        assert!(monitor.state().status().degraded);
        assert_eq!(monitor.sample(Instant::now()), None);
        assert!(!monitor.state().is_active());
    }

    #[test]
    fn test_claim_failure_is_degraded() {
        let mut gpio = SimulatedGpio::new();
        let _held = gpio.input(STOP, crate::gpio::Pull::Up).unwrap();
        let monitor = EmergencyStopMonitor::open(Some(&mut gpio), &config(None));
        assert!(monitor.is_degraded());
    }

    #[test]
    fn test_reset_claim_failure_releases_stop_pin() {
        let mut gpio = SimulatedGpio::new();
        let _held = gpio.input(RESET, crate::gpio::Pull::Up).unwrap();
        let monitor = EmergencyStopMonitor::open(Some(&mut gpio), &config(Some(RESET)));
        assert!(monitor.is_degraded());
        assert!(!gpio.is_claimed(STOP));
    }

    // ==================== Manual Trigger Tests ====================

    #[test]
    fn test_force_trigger_needs_force_reset() {
        let (_gpio, mut monitor) = open(None);
        let t0 = Instant::now();
        assert_eq!(monitor.force_trigger(t0), Some(StopEvent::Triggered));
        assert!(monitor.state().is_active());

        // Button is released, but the forced latch holds
        assert!(run(&mut monitor, t0, 500).is_empty());
        assert!(monitor.state().is_active());

        assert_eq!(monitor.force_reset(t0 + ms(600)), Some(StopEvent::Reset));
        assert!(!monitor.state().is_active());
    }

    #[test]
    fn test_force_reset_refused_while_pressed() {
        let (gpio, mut monitor) = open(None);
        let t0 = Instant::now();
        gpio.set_level(STOP, Level::Low);
        run(&mut monitor, t0, 150);
        assert_eq!(monitor.force_reset(t0 + ms(200)), None);
        assert!(monitor.state().is_active());
    }

    #[test]
    fn test_force_trigger_on_degraded_monitor() {
        let mut monitor = EmergencyStopMonitor::degraded();
        let now = Instant::now();
        assert_eq!(monitor.force_trigger(now), Some(StopEvent::Triggered));
        assert!(monitor.state().is_active());
        assert_eq!(monitor.force_reset(now), Some(StopEvent::Reset));
    }

    // ==================== Watcher Tests ====================

    #[test]
    fn test_watcher_latches_on_press() {
        let (gpio, monitor) = open(None);
        let watcher = monitor.spawn_watcher().unwrap();
        let state = watcher.state();
        let mut rx = state.subscribe();

        gpio.set_level(STOP, Level::Low);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !state.is_active() {
            assert!(Instant::now() < deadline, "watcher never latched");
            std::thread::sleep(ms(5));
        }

        let monitor = watcher.stop().unwrap();
        assert_eq!(monitor.phase(), StopPhase::LatchedAwaitingReset);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().active);
    }
}
