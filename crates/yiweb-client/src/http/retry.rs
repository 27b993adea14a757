//! Retry logic for flaky operations
//!
//! The default policy waits a **fixed** delay between attempts. Fixed delays
//! keep behaviour predictable but can synchronise retries from many clients
//! during a shared outage (thundering herd); configure
//! [`Backoff::Exponential`] with jitter for endpoints where that matters.
//!
//! After the final attempt the last error is returned unchanged.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff as _;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};

/// Delay strategy between attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Backoff {
    /// Wait `RetryPolicy::delay` every time
    Fixed,
    /// Grow the delay by `multiplier` each attempt, capped at `max_delay`
    Exponential {
        multiplier: f64,
        #[serde(with = "crate::config::duration_ms")]
        max_delay: Duration,
        /// Randomise delays to spread out retries
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Base delay between attempts
    #[serde(with = "crate::config::duration_ms")]
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// A single attempt, no retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Switch to exponential backoff
    pub fn with_exponential_backoff(mut self, multiplier: f64, max_delay: Duration, jitter: bool) -> Self {
        self.backoff = Backoff::Exponential {
            multiplier,
            max_delay,
            jitter,
        };
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if let Backoff::Exponential { multiplier, max_delay, .. } = &self.backoff {
            if *multiplier < 1.0 {
                return Err("Backoff multiplier must be >= 1.0".to_string());
            }
            if *max_delay < self.delay {
                return Err("max_delay should be >= delay".to_string());
            }
        }
        Ok(())
    }

    fn schedule(&self) -> DelaySchedule {
        match &self.backoff {
            Backoff::Fixed => DelaySchedule::Fixed(self.delay),
            Backoff::Exponential {
                multiplier,
                max_delay,
                jitter,
            } => DelaySchedule::Exponential(ExponentialBackoff {
                current_interval: self.delay,
                initial_interval: self.delay,
                max_interval: *max_delay,
                multiplier: *multiplier,
                randomization_factor: if *jitter { 0.5 } else { 0.0 },
                max_elapsed_time: None, // attempts are bounded by max_attempts
                ..Default::default()
            }),
        }
    }

    /// Run `op` until it succeeds or `max_attempts` is exhausted
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute_if(op, |_| true).await
    }

    /// Like [`execute`](Self::execute) but only retries errors accepted by `should_retry`
    pub async fn execute_if<F, Fut, T, E, P>(&self, mut op: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut schedule = self.schedule();
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < max_attempts && should_retry(&error) => {
                    let delay = schedule.next();
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(attempt, error = %error, "Operation failed, not retrying");
                    return Err(error);
                }
            }
        }
    }
}

enum DelaySchedule {
    Fixed(Duration),
    Exponential(ExponentialBackoff),
}

impl DelaySchedule {
    fn next(&mut self) -> Duration {
        match self {
            DelaySchedule::Fixed(delay) => *delay,
            DelaySchedule::Exponential(backoff) => backoff
                .next_backoff()
                .unwrap_or(backoff.max_interval),
        }
    }
}

/// Retry `op` up to `max_attempts` times with a fixed `delay` between attempts
pub async fn retry<F, Fut, T, E>(op: F, max_attempts: u32, delay: Duration) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    RetryPolicy::new(max_attempts, delay).execute(op).await
}
