//! Injectable time source.
//!
//! Every timing decision in the engine (scheduler ticks, retry readiness,
//! alert cooldowns, health windows) reads the time through a [`Clock`], so
//! tests can drive time explicitly with a [`ManualClock`].

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// A source of the current time plus a matching way to wait.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Waits for `duration` as measured by this clock.
    async fn sleep(&self, duration: Duration);

    /// Milliseconds elapsed since `earlier`, saturating at zero.
    fn millis_since(&self, earlier: DateTime<Utc>) -> u64 {
        let elapsed = self.now() - earlier;
        u64::try_from(elapsed.num_milliseconds()).unwrap_or(0)
    }
}

/// Wall-clock time backed by `chrono::Utc` and `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a shared system clock.
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock that only moves when told to.
///
/// `sleep` advances the virtual time by the requested duration and returns
/// immediately, which makes backoff sequences observable without waiting.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a manual clock starting at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Creates a manual clock starting at the current wall-clock time.
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Moves the clock forward.
    pub fn advance(&self, duration: Duration) {
        let delta = ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::zero());
        let mut now = self.now.lock();
        *now += delta;
    }

    /// Moves the clock forward by a number of milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Jumps the clock to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_now()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(epoch());
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), epoch() + ChronoDuration::seconds(90));
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::new(epoch());
        let later = epoch() + ChronoDuration::days(3);
        clock.set(later);
        assert_eq!(clock.now(), later);
    }

    #[test]
    fn test_millis_since_saturates() {
        let clock = ManualClock::new(epoch());
        let future = epoch() + ChronoDuration::seconds(5);
        assert_eq!(clock.millis_since(future), 0);
        clock.advance_millis(7_500);
        assert_eq!(clock.millis_since(epoch()), 7_500);
    }

    #[tokio::test]
    async fn test_manual_sleep_advances_virtual_time() {
        let clock = ManualClock::new(epoch());
        clock.sleep(Duration::from_millis(250)).await;
        clock.sleep(Duration::from_millis(250)).await;
        assert_eq!(clock.millis_since(epoch()), 500);
    }

    #[tokio::test]
    async fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let before = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now() >= before);
    }
}
