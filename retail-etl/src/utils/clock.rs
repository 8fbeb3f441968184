//! Injectable clock for polling and retry delays.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::time::Duration;

/// Source of wall-clock time and delays.
///
/// Stages and the orchestrator never call `tokio::time::sleep` directly so
/// that polling loops can be driven in tests without real waits.
#[async_trait]
pub trait Clock: Send + Sync + Debug {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Waits for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock for tests.
///
/// `sleep` returns immediately after advancing the virtual time and
/// recording the requested duration. It yields to the runtime once so
/// background tasks spawned by collaborators can make progress.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Creates a clock starting at the current real time.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a clock starting at a fixed instant.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Returns every sleep requested so far.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    /// Returns the total virtual time slept.
    #[must_use]
    pub fn total_slept(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }

    /// Moves the clock forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_records_sleeps() {
        let start = Utc::now();
        let clock = ManualClock::starting_at(start);

        clock.sleep(Duration::from_secs(30)).await;
        clock.sleep(Duration::from_secs(30)).await;

        assert_eq!(clock.sleeps().len(), 2);
        assert_eq!(clock.total_slept(), Duration::from_secs(60));
        assert_eq!((clock.now() - start).num_seconds(), 60);
    }

    #[tokio::test]
    async fn test_system_clock_sleeps() {
        let clock = SystemClock;
        let before = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now() >= before);
    }
}
