//! Wall-clock abstraction
//!
//! Every time read in the scheduler and the item engine goes through a
//! [`Clock`], so tests can drive time explicitly with a [`ManualClock`].

use chrono::{DateTime, Duration, Local};
use std::sync::{Arc, RwLock};

/// Source of the current local time
pub trait Clock: Send + Sync {
    /// Current wall-clock time in the local timezone
    fn now(&self) -> DateTime<Local>;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A controllable clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<RwLock<DateTime<Local>>>,
}

impl ManualClock {
    /// Create a manual clock starting at the current system time
    pub fn new() -> Self {
        Self::at(Local::now())
    }

    /// Create a manual clock starting at a specific time
    pub fn at(time: DateTime<Local>) -> Self {
        Self {
            current: Arc::new(RwLock::new(time)),
        }
    }

    /// Set the current time
    pub fn set(&self, time: DateTime<Local>) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = time;
    }

    /// Advance time by a duration
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current += duration;
    }

    /// Advance time by seconds
    pub fn advance_seconds(&self, seconds: i64) {
        self.advance(Duration::seconds(seconds));
    }

    /// Advance time by minutes
    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(Duration::minutes(minutes));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }
}
