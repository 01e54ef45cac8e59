//! Screen-owned polling for badge counters.
//!
//! The poller never runs on its own. The host asks `poll(now)` when it wants to
//! refresh, and the poller answers whether a refresh is due. Stopping it (or
//! dropping the screen that owns it) ends polling.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Start polling. The first poll after a start is due immediately.
    pub fn start(&mut self, now: Instant) {
        self.next_due = Some(now);
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    /// True when a refresh is due; schedules the next one.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }

    pub fn next_due_in(&self, now: Instant) -> Option<Duration> {
        self.next_due.map(|due| due.saturating_duration_since(now))
    }
}
