//! Bounded retry with exponential backoff and jitter
//!
//! The policy is independent of any transport: it runs an async operation,
//! classifies its failures against an explicit list of transient
//! [`ErrorKind`]s and sleeps between attempts. Sleeping is a tokio timer, so
//! the task yields while it waits, and dropping the returned future cancels
//! the loop: no further attempt is scheduled.

use crate::config::{saturating_duration, RetryConfig};
use crate::error::{ErrorKind, PubSubError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry policy for transient publish failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    retry_on: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    /// 5 attempts, 4s initial delay doubling up to 60s, 50% jitter.
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Build a policy from validated configuration.
    ///
    /// Retries on [`ErrorKind::TRANSIENT`]: connection failures, timeouts and
    /// retryable broker statuses.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: saturating_duration(config.initial_delay_secs),
            max_delay: saturating_duration(config.max_delay_secs),
            jitter: config.jitter,
            retry_on: ErrorKind::TRANSIENT.to_vec(),
        }
    }

    /// A policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the initial and maximum delay. `max` is raised to `initial` if lower.
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max.max(initial);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() { jitter.max(0.0) } else { 0.0 };
        self
    }

    /// Replace the list of error kinds treated as transient.
    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retry_on = kinds.into_iter().collect();
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable(&self, err: &PubSubError) -> bool {
        self.retry_on.contains(&err.kind())
    }

    /// Delay before the attempt following attempt number `attempt` (1-based),
    /// without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * 2f64.powi(exponent);
        saturating_duration(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Base delay plus a random share of up to `jitter` times itself, capped
    /// at the maximum delay.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let extra = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.jitter) * base
        } else {
            0.0
        };
        saturating_duration((base + extra).min(self.max_delay.as_secs_f64()))
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error or
    /// runs out of attempts.
    ///
    /// After exhaustion the last transient error is returned unchanged.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.is_retryable(&err) {
                return Err(err);
            }

            if attempt >= self.max_attempts {
                tracing::warn!(
                    attempts = attempt,
                    error = %err,
                    "Giving up after transient failures"
                );
                return Err(err);
            }

            let delay = self.delay(attempt);
            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
