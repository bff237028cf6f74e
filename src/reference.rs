//! Thread-safe reference-time cell (spec.md §4.9): the engine's single
//! source of truth for `now()`, readable from any thread without contending
//! with the engine's actor loop.
//!
//! Grounded in the teacher's pattern of keeping socket/clock state behind a
//! small owned struct with a narrow public surface (`sntpc`'s
//! `NtpContext`); generalized here to a `RwLock` cell since multiple reader
//! threads must see a consistent snapshot while one writer (the engine)
//! replaces it wholesale on each accepted round.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::domain::FrozenTime;
use crate::traits::MonotonicClock;

/// Shared, thread-safe cell holding the most recently accepted
/// [`FrozenTime`], if any.
#[derive(Clone)]
pub struct ReferenceCell {
    inner: Arc<RwLock<Option<FrozenTime>>>,
    clock: Arc<dyn MonotonicClock>,
}

impl ReferenceCell {
    #[must_use]
    pub fn new(clock: Arc<dyn MonotonicClock>) -> Self {
        ReferenceCell {
            inner: Arc::new(RwLock::new(None)),
            clock,
        }
    }

    /// Replace the reference with a freshly accepted sample's derived time.
    pub fn set(&self, frozen: FrozenTime) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(frozen);
    }

    /// The most recent [`FrozenTime`], if any reference has been set yet.
    #[must_use]
    pub fn get(&self) -> Option<FrozenTime> {
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Current best estimate of wall time, in milliseconds since the Unix
    /// epoch. `None` until the first round completes (spec.md §4.9).
    #[must_use]
    pub fn now(&self) -> Option<i64> {
        self.get().map(|frozen| frozen.now(self.clock.uptime()))
    }

    /// Age of the current reference, or `None` if unset.
    #[must_use]
    pub fn age(&self) -> Option<Duration> {
        self.get().map(|frozen| frozen.age(self.clock.uptime()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(std::sync::Mutex<Duration>);

    impl MonotonicClock for FixedClock {
        fn uptime(&self) -> Duration {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn unset_cell_reports_no_reference() {
        let clock: Arc<dyn MonotonicClock> = Arc::new(FixedClock(std::sync::Mutex::new(Duration::ZERO)));
        let cell = ReferenceCell::new(clock);
        assert!(cell.now().is_none());
        assert!(cell.age().is_none());
    }

    #[test]
    fn set_then_now_compensates_elapsed_uptime() {
        let clock = Arc::new(FixedClock(std::sync::Mutex::new(Duration::from_secs(5))));
        let cell = ReferenceCell::new(clock.clone());
        cell.set(FrozenTime {
            wall_time_ms: 1_000_000,
            uptime_at_response: Duration::from_secs(5),
            sample_size: 3,
        });
        assert_eq!(cell.now(), Some(1_000_000));

        *clock.0.lock().unwrap() = Duration::from_secs(8);
        assert_eq!(cell.now(), Some(1_003_000));
        assert_eq!(cell.age(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn later_set_overwrites_earlier_reference_even_if_time_steps_back() {
        let clock = Arc::new(FixedClock(std::sync::Mutex::new(Duration::from_secs(0))));
        let cell = ReferenceCell::new(clock);
        cell.set(FrozenTime {
            wall_time_ms: 2_000_000,
            uptime_at_response: Duration::ZERO,
            sample_size: 1,
        });
        cell.set(FrozenTime {
            wall_time_ms: 1_000_000,
            uptime_at_response: Duration::ZERO,
            sample_size: 1,
        });
        // spec.md §9(c): now() may step non-monotonically across updates.
        assert_eq!(cell.now(), Some(1_000_000));
    }
}
