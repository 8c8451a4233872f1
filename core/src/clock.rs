//! Wall clock abstraction. Every time-dependent rule (payment expiry,
//! accrual due-ness, withdrawal window, daily limit) reads an injected clock.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used by tests and replay tooling.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Starts at a Tuesday 10:00 in UTC+7, inside the default withdrawal window.
    pub fn default_start() -> Self {
        let start = Utc
            .with_ymd_and_hms(2025, 3, 4, 3, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(start)
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.lock() = to;
    }

    /// Advance by `by`. Returns the new time.
    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut current = self.lock();
        *current += by;
        *current
    }

    pub fn advance_hours(&self, hours: i64) -> DateTime<Utc> {
        self.advance(Duration::hours(hours))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned clock still holds a valid timestamp.
        self.current.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

/// Stored timestamps are INTEGER unix milliseconds.
pub fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
