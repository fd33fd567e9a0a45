//! Microsecond timestamps and the clocks that produce them.
//!
//! Every component that stamps or compares deletion times goes through a
//! [`Clock`] handle rather than reading the system time directly, so tests
//! can drive time by hand with [`ManualClock`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The earliest representable instant.
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    /// Move back by `micros`, stopping at zero.
    pub fn saturating_sub_micros(&self, micros: u64) -> Self {
        Timestamp(self.0.saturating_sub(micros))
    }

    /// Move forward by `micros`, stopping at the maximum value.
    pub fn saturating_add_micros(&self, micros: u64) -> Self {
        Timestamp(self.0.saturating_add(micros))
    }

    /// Elapsed time from `earlier` to `self`, zero if `earlier` is later.
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

impl From<u64> for Timestamp {
    fn from(micros: u64) -> Self {
        Timestamp(micros)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time in microseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Timestamp(micros)
    }
}

/// Wraps another clock and never lets the reported time go backwards.
///
/// A regression in the inner clock is absorbed by repeating the highest value
/// seen so far. The regression is logged at debug level and otherwise left to
/// the skew tolerance applied when querying the ledger.
#[derive(Debug, Default)]
pub struct MonotonicClock<C: Clock> {
    inner: C,
    high_water: AtomicU64,
}

impl<C: Clock> MonotonicClock<C> {
    pub fn new(inner: C) -> Self {
        MonotonicClock {
            inner,
            high_water: AtomicU64::new(0),
        }
    }
}

impl MonotonicClock<SystemClock> {
    pub fn system() -> Self {
        Self::new(SystemClock)
    }
}

impl<C: Clock> Clock for MonotonicClock<C> {
    fn now(&self) -> Timestamp {
        let observed = self.inner.now().as_micros();
        let previous = self.high_water.fetch_max(observed, Ordering::AcqRel);
        if observed < previous {
            tracing::debug!(
                observed,
                previous,
                regression_us = previous - observed,
                "clock went backwards, holding previous time"
            );
            Timestamp(previous)
        } else {
            Timestamp(observed)
        }
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        ManualClock {
            micros: AtomicU64::new(start.as_micros()),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.micros.store(time.as_micros(), Ordering::SeqCst);
    }

    /// Advance by `micros` and return the new time.
    pub fn advance(&self, micros: u64) -> Timestamp {
        Timestamp(self.micros.fetch_add(micros, Ordering::SeqCst) + micros)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.micros.load(Ordering::SeqCst))
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_saturating_arithmetic() {
        let t = Timestamp::from_micros(10);
        assert_eq!(t.saturating_sub_micros(50), Timestamp::ZERO);
        assert_eq!(t.saturating_sub_micros(4), Timestamp::from_micros(6));
        assert_eq!(
            Timestamp::from_micros(u64::MAX).saturating_add_micros(1),
            Timestamp::from_micros(u64::MAX)
        );
    }

    #[test]
    fn test_duration_since() {
        let a = Timestamp::from_micros(1_000);
        let b = Timestamp::from_micros(3_500);
        assert_eq!(b.duration_since(a), Duration::from_micros(2_500));
        assert_eq!(a.duration_since(b), Duration::ZERO);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(Timestamp::from_micros(100));
        assert_eq!(clock.now(), Timestamp::from_micros(100));
        assert_eq!(clock.advance(50), Timestamp::from_micros(150));
        clock.set(Timestamp::from_micros(7));
        assert_eq!(clock.now(), Timestamp::from_micros(7));
    }

    #[test]
    fn test_monotonic_clock_holds_on_regression() {
        let inner = Arc::new(ManualClock::new(Timestamp::from_micros(1_000)));
        let clock = MonotonicClock::new(inner.clone());

        assert_eq!(clock.now(), Timestamp::from_micros(1_000));

        inner.set(Timestamp::from_micros(400));
        assert_eq!(clock.now(), Timestamp::from_micros(1_000));

        inner.set(Timestamp::from_micros(2_000));
        assert_eq!(clock.now(), Timestamp::from_micros(2_000));
    }

    #[test]
    fn test_system_clock_is_after_epoch() {
        assert!(SystemClock.now() > Timestamp::ZERO);
    }
}
