//! Shared emergency-stop status.
//!
//! [`StopState`] has exactly one writer (the monitor, either polled from the
//! control tick or running on its watcher thread) and any number of readers.
//! The flags readers poll every tick are plain atomics; a `watch` channel
//! carries full [`StopStatus`] snapshots to subscribers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;

/// Emergency-stop state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum StopPhase {
    #[default]
    Idle = 0,
    Triggered = 1,
    LatchedAwaitingReset = 2,
}

impl StopPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => StopPhase::Triggered,
            2 => StopPhase::LatchedAwaitingReset,
            _ => StopPhase::Idle,
        }
    }

    /// Phases in which actuation must be neutral.
    #[must_use]
    pub fn is_active(self) -> bool {
        self != StopPhase::Idle
    }
}

impl fmt::Display for StopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopPhase::Idle => write!(f, "idle"),
            StopPhase::Triggered => write!(f, "triggered"),
            StopPhase::LatchedAwaitingReset => write!(f, "latched, awaiting reset"),
        }
    }
}

/// Point-in-time view of the stop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopStatus {
    /// Actuation must be neutral.
    pub active: bool,
    /// The hardware safety path is unavailable.
    pub degraded: bool,
    pub phase: StopPhase,
    /// `false` while a pin change is still inside its debounce window.
    pub debounced: bool,
    pub last_transition: Option<Instant>,
}

impl StopStatus {
    /// Time since the last phase change.
    #[must_use]
    pub fn since_last_transition(&self, now: Instant) -> Option<Duration> {
        self.last_transition
            .map(|at| now.saturating_duration_since(at))
    }
}

/// Single-writer, multi-reader stop state.
#[derive(Debug)]
pub struct StopState {
    epoch: Instant,
    active: AtomicBool,
    degraded: AtomicBool,
    settling: AtomicBool,
    phase: AtomicU8,
    /// Microseconds after `epoch`, plus one; zero means no transition yet.
    last_transition_us: AtomicU64,
    tx: watch::Sender<StopStatus>,
}

impl Default for StopState {
    fn default() -> Self {
        Self::new()
    }
}

impl StopState {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StopStatus {
            debounced: true,
            ..StopStatus::default()
        });
        Self {
            epoch: Instant::now(),
            active: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
            settling: AtomicBool::new(false),
            phase: AtomicU8::new(StopPhase::Idle as u8),
            last_transition_us: AtomicU64::new(0),
            tx,
        }
    }

    /// Emergency stop active: motors must be neutral.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Safety monitor running without hardware.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn phase(&self) -> StopPhase {
        StopPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn last_transition(&self) -> Option<Instant> {
        match self.last_transition_us.load(Ordering::Acquire) {
            0 => None,
            us => Some(self.epoch + Duration::from_micros(us - 1)),
        }
    }

    /// Snapshot of all fields. `active` is derived from the same phase load
    /// so the two always agree.
    #[must_use]
    pub fn status(&self) -> StopStatus {
        let phase = self.phase();
        StopStatus {
            active: phase.is_active(),
            degraded: self.is_degraded(),
            phase,
            debounced: !self.settling.load(Ordering::Acquire),
            last_transition: self.last_transition(),
        }
    }

    /// Receives a new snapshot on every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StopStatus> {
        self.tx.subscribe()
    }

    pub(crate) fn set_phase(&self, phase: StopPhase, now: Instant) {
        let us = now.saturating_duration_since(self.epoch).as_micros();
        let stamp = u64::try_from(us).unwrap_or(u64::MAX - 1) + 1;
        self.last_transition_us.store(stamp, Ordering::Release);
        self.phase.store(phase as u8, Ordering::Release);
        self.active.store(phase.is_active(), Ordering::Release);
        self.publish();
    }

    pub(crate) fn set_settling(&self, settling: bool) {
        if self.settling.swap(settling, Ordering::AcqRel) != settling {
            self.publish();
        }
    }

    pub(crate) fn mark_degraded(&self) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            self.publish();
        }
    }

    fn publish(&self) {
        self.tx.send_replace(self.status());
    }
}
