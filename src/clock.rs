//! Time source used by every decision.
//!
//! All expiry math goes through a [`Clock`] so tests can move time forward
//! without sleeping.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// A clock starting at 2024-01-01T00:00:00Z.
    #[must_use]
    pub fn epoch() -> Self {
        Self::new(DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap_or_default())
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .single()
            .unwrap_or_default()
    }
}

/// Convert a std duration into a chrono one, saturating on overflow.
#[must_use]
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Latest instant handed out by [`after`]: 9999-12-31T23:59:59Z, the last one
/// that still round-trips through RFC 3339.
const MAX_TIMESTAMP: i64 = 253_402_300_799;

/// `now + duration`, clamped to 9999-12-31T23:59:59Z instead of overflowing.
#[must_use]
pub fn after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    let limit = DateTime::<Utc>::from_timestamp(MAX_TIMESTAMP, 0).unwrap_or(DateTime::<Utc>::MAX_UTC);
    now.checked_add_signed(to_chrono(duration))
        .map_or(limit, |at| at.min(limit))
}

/// Whole seconds from `now` until `until`, never negative.
#[must_use]
pub fn seconds_until(now: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
    u64::try_from(until.signed_duration_since(now).num_seconds()).unwrap_or(0)
}
