//! Debounce and throttle helpers for async work
//!
//! Typical use is search-as-you-type: every keystroke calls
//! [`Debouncer::call`], and only the call that is followed by a quiet window
//! actually hits the network.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Runs only the last of a burst of calls
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Wait out the quiet window, then run `fut` unless a newer call arrived
    ///
    /// Superseded calls return `None` without polling `fut`.
    pub async fn call<F, T>(&self, fut: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if self.generation.load(Ordering::SeqCst) != ticket {
            tracing::trace!(ticket, "Debounced call superseded");
            return None;
        }
        Some(fut.await)
    }

    /// Supersede every pending call
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Allows at most one run per interval
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_run: Arc<Mutex<Option<Instant>>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: Arc::new(Mutex::new(None)),
        }
    }

    /// Claim the current window; `false` if a run already happened in it
    pub fn try_acquire(&self) -> bool {
        let Ok(mut last_run) = self.last_run.lock() else {
            return false;
        };
        let now = Instant::now();
        match *last_run {
            Some(at) if now.saturating_duration_since(at) < self.interval => false,
            _ => {
                *last_run = Some(now);
                true
            }
        }
    }

    /// Run `fut` if the window is free, otherwise skip it
    pub async fn run<F, T>(&self, fut: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        if self.try_acquire() {
            Some(fut.await)
        } else {
            tracing::trace!(interval_ms = self.interval.as_millis() as u64, "Throttled call skipped");
            None
        }
    }

    pub fn reset(&self) {
        if let Ok(mut last_run) = self.last_run.lock() {
            *last_run = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_only_last_call_runs() {
        let debouncer = Debouncer::new(Duration::from_millis(300));
        let runs = Arc::new(AtomicUsize::new(0));

        let call = |value: u32| {
            let debouncer = debouncer.clone();
            let runs = runs.clone();
            async move {
                debouncer
                    .call(async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        value
                    })
                    .await
            }
        };

        let first = call(1);
        let second = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            call(2).await
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first, None);
        assert_eq!(second, Some(2));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_calls_all_run() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        assert_eq!(debouncer.call(async { 1 }).await, Some(1));
        assert_eq!(debouncer.call(async { 2 }).await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_supersedes_pending() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            debouncer.cancel();
        };
        let (result, ()) = tokio::join!(debouncer.call(async { 1 }), canceller);
        assert_eq!(result, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_window() {
        let throttle = Throttle::new(Duration::from_millis(100));
        assert_eq!(throttle.run(async { 1 }).await, Some(1));
        assert_eq!(throttle.run(async { 2 }).await, None);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(throttle.try_acquire());
        assert!(!throttle.try_acquire());

        throttle.reset();
        assert!(throttle.try_acquire());
    }
}
