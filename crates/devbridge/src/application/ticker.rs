//! Periodic task with a cancel handle.
//!
//! A [`Ticker`] owns one spawned Tokio task that calls a closure at a fixed
//! period.  Dropping the `Ticker` aborts the task, so a session that owns its
//! tickers stops them deterministically simply by being removed from its
//! manager's registry.
//!
//! The first tick fires one full period after start (like a browser's
//! `setInterval`), never immediately.  Ticks that would fall behind because a
//! callback ran long are skipped rather than bunched up.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Returned by a tick callback to keep or end the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    Stop,
}

/// A running periodic task.  Stops when dropped.
#[derive(Debug)]
pub struct Ticker {
    handle: JoinHandle<()>,
    period: Duration,
}

impl Ticker {
    /// Spawns the loop.  A zero `period` is clamped to 1 ms.
    pub fn start<F, Fut>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickFlow> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if on_tick().await == TickFlow::Stop {
                    break;
                }
            }
        });

        Self { handle, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns `true` once the loop has ended (callback returned
    /// [`TickFlow::Stop`] or the task was aborted).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_ticker(period: Duration, counter: &Arc<AtomicUsize>) -> Ticker {
        let counter = Arc::clone(counter);
        Ticker::start(period, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                TickFlow::Continue
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_fires_once_per_period() {
        // Arrange
        let counter = Arc::new(AtomicUsize::new(0));
        let _ticker = counting_ticker(Duration::from_millis(100), &counter);

        // Act
        tokio::time::sleep(Duration::from_millis(350)).await;

        // Assert: ticks at 100, 200, 300 ms
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_does_not_fire_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let _ticker = counting_ticker(Duration::from_secs(1), &counter);

        tokio::time::sleep(Duration::from_millis(999)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_ticker_stops_callbacks() {
        // Arrange
        let counter = Arc::new(AtomicUsize::new(0));
        let ticker = counting_ticker(Duration::from_millis(100), &counter);
        tokio::time::sleep(Duration::from_millis(250)).await;

        // Act
        drop(ticker);
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        // Assert: no ticks after the drop
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flow_ends_loop() {
        let ticker = Ticker::start(Duration::from_millis(10), || async { TickFlow::Stop });

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(ticker.is_finished());
    }

    #[tokio::test]
    async fn test_zero_period_is_clamped() {
        let ticker = Ticker::start(Duration::ZERO, || async { TickFlow::Stop });
        assert_eq!(ticker.period(), Duration::from_millis(1));
    }
}
