//! Bounded exponential backoff.
//!
//! A [`RetryPolicy`] wraps any operation whose successful result carries an HTTP-like status code
//! (see [`Status`]). Attempts whose status the policy considers retryable are repeated after a
//! delay that doubles every time, until the attempt budget runs out. Errors returned by the
//! operation itself are never retried.
//!
//! The policy knows nothing about transports: [`RetryPolicy::run`] sleeps the current thread,
//! [`RetryPolicy::run_async`] sleeps on the tokio timer.

use std::{future::Future, time::Duration};

/// HTTP 429, the only status retried by default.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// A value that carries a status code the policy can inspect.
pub trait Status {
    fn status(&self) -> u16;
}

/// Retry configuration.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for every following one.
    pub base_delay: Duration,
    /// Decides whether a status code is worth another attempt.
    pub retryable: fn(u16) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            retryable: is_rate_limited,
        }
    }
}

/// Default retry predicate: rate limited responses only.
pub fn is_rate_limited(status: u16) -> bool {
    status == TOO_MANY_REQUESTS
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug, PartialEq)]
pub enum Outcome<T> {
    /// The last attempt returned a status that is not retryable.
    Completed { value: T, attempts: u32 },
    /// Every attempt returned a retryable status; holds the last value.
    Exhausted { last: T, attempts: u32 },
}

impl RetryPolicy {
    /// Sets the total number of attempts.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the delay before the first retry.
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the retry predicate.
    pub fn retryable(mut self, retryable: fn(u16) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Delay to wait after the given zero-based attempt failed: `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Decides what to do with the value returned by the zero-based `attempt`.
    ///
    /// Returns the value back if it is final, or the delay to wait before the next attempt.
    fn classify<T: Status>(&self, attempt: u32, value: T) -> Result<Outcome<T>, (T, Duration)> {
        let attempts = attempt + 1;
        let status = value.status();

        if !(self.retryable)(status) {
            return Ok(Outcome::Completed { value, attempts });
        }

        if attempts >= self.attempts() {
            return Ok(Outcome::Exhausted {
                last: value,
                attempts,
            });
        }

        Err((value, self.delay_for(attempt)))
    }

    /// Runs `op` until it returns a non-retryable status or the attempt budget is exhausted.
    ///
    /// `op` receives the zero-based attempt number. Blocks the current thread between attempts.
    pub fn run<T, E, F>(&self, mut op: F) -> Result<Outcome<T>, E>
    where
        T: Status,
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut attempt = 0;
        loop {
            let value = op(attempt)?;
            match self.classify(attempt, value) {
                Ok(outcome) => return Ok(outcome),
                Err((value, delay)) => {
                    tracing::warn!(
                        status = value.status(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retryable status, backing off"
                    );
                    std::thread::sleep(delay);
                }
            }
            attempt += 1;
        }
    }

    /// Async version of [`RetryPolicy::run`], sleeping on the tokio timer.
    pub async fn run_async<T, E, F, Fut>(&self, mut op: F) -> Result<Outcome<T>, E>
    where
        T: Status,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            let value = op(attempt).await?;
            match self.classify(attempt, value) {
                Ok(outcome) => return Ok(outcome),
                Err((value, delay)) => {
                    tracing::warn!(
                        status = value.status(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retryable status, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
            attempt += 1;
        }
    }
}
