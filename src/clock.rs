use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Source of time for everything that schedules work from the event loop.
///
/// `now` drives timers, `wall_now` stamps records. Tests swap in a manual
/// clock so debounce and auto-hide behaviour can be stepped deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn wall_now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A cancellable one-shot deadline owned by a single controller.
///
/// Nothing fires by itself: the owner calls [`OneShotTimer::fire_if_due`]
/// from its tick and acts when it returns `true`.
#[derive(Debug, Default, Clone)]
pub struct OneShotTimer {
    deadline: Option<Instant>,
}

impl OneShotTimer {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Replaces any pending deadline with `now + delay`.
    pub fn schedule(&mut self, now: Instant, delay: Duration) {
        self.deadline = Some(now + delay);
    }

    /// Safe to call when nothing is pending.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` exactly once, on the first call at or after the deadline.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
