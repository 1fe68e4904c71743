//! Time-based debouncing of a digital level.
//!
//! A candidate change is accepted only after the raw level has stayed at the
//! new value for the whole window, measured from the first observation of
//! the change. A bounce back to the stable level discards the candidate.
//!
//! ```
//! use std::time::{Duration, Instant};
//! use tracked_drive::safety::debounce::Debouncer;
//!
//! let t0 = Instant::now();
//! let mut debouncer = Debouncer::new(false, Duration::from_millis(100));
//!
//! assert_eq!(debouncer.update(true, t0), None);
//! assert_eq!(debouncer.update(true, t0 + Duration::from_millis(50)), None);
//! assert_eq!(debouncer.update(true, t0 + Duration::from_millis(100)), Some(true));
//! assert!(debouncer.stable());
//! ```

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Debouncer {
    stable: bool,
    candidate_since: Option<Instant>,
    window: Duration,
}

impl Debouncer {
    #[must_use]
    pub fn new(initial: bool, window: Duration) -> Self {
        Self {
            stable: initial,
            candidate_since: None,
            window,
        }
    }

    /// Feeds one raw reading taken at `now`.
    ///
    /// Returns the new stable value when a change is accepted.
    pub fn update(&mut self, raw: bool, now: Instant) -> Option<bool> {
        if raw == self.stable {
            self.candidate_since = None;
            return None;
        }

        let since = *self.candidate_since.get_or_insert(now);
        if now.saturating_duration_since(since) >= self.window {
            self.stable = raw;
            self.candidate_since = None;
            Some(raw)
        } else {
            None
        }
    }

    /// Last accepted value.
    #[must_use]
    pub fn stable(&self) -> bool {
        self.stable
    }

    /// Returns `true` while a candidate change is waiting out the window.
    #[must_use]
    pub fn is_settling(&self) -> bool {
        self.candidate_since.is_some()
    }

    /// Time left until the pending candidate would be accepted.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.candidate_since
            .map(|since| self.window.saturating_sub(now.saturating_duration_since(since)))
    }
}
