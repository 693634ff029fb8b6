//! Clock dependency used by the timing operators.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::DependencyKey;

/// A source of time and sleeps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Tokio's timer. Honors paused time in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// A clock whose sleeps complete at once, advancing its own notion of now.
#[derive(Debug)]
pub struct ImmediateClock {
    now: Mutex<Instant>,
}

impl ImmediateClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }
}

impl Default for ImmediateClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ImmediateClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        *self.now.lock() += duration;
        futures_util::future::ready(()).boxed()
    }
}

/// Key for the [`Clock`] service. Defaults to [`TokioClock`] in both modes.
pub struct ClockKey;

impl DependencyKey for ClockKey {
    type Value = Arc<dyn Clock>;

    fn live_value() -> Self::Value {
        Arc::new(TokioClock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let clock = TokioClock;
        let start = clock.now();
        clock.sleep(Duration::from_secs(5)).await;
        assert!(clock.now() - start >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn immediate_clock_advances_without_waiting() {
        let clock = ImmediateClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_secs(60)).await;
        clock.sleep(Duration::from_secs(60)).await;
        assert_eq!(clock.now() - start, Duration::from_secs(120));
    }
}
