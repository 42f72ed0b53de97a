//! Exponential backoff for connection attempts.
//!
//! `max_attempts` is the total number of tries, first one included: with the
//! default of 2 the driver is asked to connect twice and a single backoff
//! delay separates the two tries. A value of 0 still makes one attempt.

use crate::error::DriverError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_INITIAL_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_MAX_INTERVAL_MS: u64 = 6000;

/// Fully resolved retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_factor: f64,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            initial_interval_ms: DEFAULT_INITIAL_INTERVAL_MS,
            max_interval_ms: DEFAULT_MAX_INTERVAL_MS,
        }
    }
}

impl RetryPolicy {
    /// Number of tries the policy allows.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after failed attempt `attempt` (1-based) before the next try.
    ///
    /// `initial * factor^(attempt - 1)`, capped at `max_interval_ms`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_interval_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = raw.min(self.max_interval_ms as f64);
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_millis(capped as u64)
        } else {
            Duration::from_millis(self.max_interval_ms)
        }
    }

    /// Every delay the policy may sleep, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.attempts()).map(|a| self.delay_after(a)).collect()
    }
}

/// Outcome of a retry loop that ran out of attempts.
#[derive(Debug, Clone)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: Arc<DriverError>,
}

/// Run `operation` until it succeeds or the policy is exhausted.
///
/// Attempts run strictly one after another. `on_failure` is called after
/// every failed attempt, the last one included, with the 1-based attempt
/// number. On success the number of attempts used is returned with the value.
pub async fn retry_with_backoff<T, F, Fut, N>(
    policy: &RetryPolicy,
    mut operation: F,
    mut on_failure: N,
) -> Result<(T, u32), RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, DriverError>>,
    N: FnMut(u32, &Arc<DriverError>),
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(err) => {
                let err = Arc::new(err);
                on_failure(attempt, &err);

                if attempt >= attempts {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }

                let delay = policy.delay_after(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before next attempt"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
