//! Bounded retries with exponential backoff and jitter.

use std::{future::Future, time::Duration};

use tracing::warn;

use crate::error::ClientError;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Default cap on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Retry policy for one logical request.
///
/// Only errors for which [`ClientError::is_retryable`] holds are retried;
/// everything else propagates on first occurrence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self::new(DEFAULT_MAX_RETRIES) }
}

impl RetryPolicy {
    /// Policy allowing `max_retries` retries (so `max_retries + 1` attempts)
    /// with the default delays and jitter enabled.
    #[must_use]
    pub const fn new(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }

    /// Policy that never retries.
    #[must_use]
    pub const fn none() -> Self { Self::new(0) }

    /// Replace the initial and maximum delays.
    #[must_use]
    pub const fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total attempts, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 { self.max_attempts }

    /// Delay before the retry that follows failed attempt `attempt`
    /// (1-based).
    ///
    /// The base delay doubles per attempt from the initial delay. When
    /// jitter is enabled a uniform random amount up to the maximum delay is
    /// added. The result never exceeds the maximum delay.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let base = self.initial_delay.saturating_mul(factor);
        let jitter = if self.jitter {
            self.max_delay.mul_f64(rand::random::<f64>())
        } else {
            Duration::ZERO
        };
        base.saturating_add(jitter).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the last retryable error
    /// once attempts are exhausted.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
