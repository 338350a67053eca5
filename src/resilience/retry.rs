// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff and jitter.
//!
//! Delay for retry `n` (0-indexed) is `min(base * 2^n, cap)` plus a random
//! jitter of up to 30% of that value, so the worst case is `cap * 1.3`.
//!
//! # Example
//!
//! ```
//! use offline_resilience::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1));
//! assert_eq!(policy.base_delay(0), Duration::from_millis(100));
//! assert_eq!(policy.base_delay(3), Duration::from_millis(800));
//! assert_eq!(policy.base_delay(10), Duration::from_secs(1)); // capped
//!
//! let jittered = policy.delay_for(10);
//! assert!(jittered >= Duration::from_secs(1));
//! assert!(jittered <= Duration::from_millis(1300));
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::RequestError;

/// Default jitter: up to 30% of the computed delay.
pub const DEFAULT_JITTER_RATIO: f64 = 0.3;

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Fraction of the computed delay added as random jitter (0.0 disables).
    pub jitter_ratio: f64,
}

impl BackoffPolicy {
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }

    /// Same schedule, no jitter. Useful for deterministic tests.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_ratio = 0.0;
        self
    }

    /// `min(base * 2^attempt, cap)` with saturating arithmetic.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |d| d.min(self.cap))
    }

    /// Delay with jitter drawn from `unit` in `[0.0, 1.0]`.
    #[must_use]
    pub fn delay_with_unit(&self, attempt: u32, unit: f64) -> Duration {
        let delay = self.base_delay(attempt);
        let unit = unit.clamp(0.0, 1.0);
        delay + scale(delay, self.jitter_ratio * unit)
    }

    /// Delay with random jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let unit: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        self.delay_with_unit(attempt, unit)
    }

    /// Upper bound of any value returned by [`delay_for`](Self::delay_for).
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.cap + scale(self.cap, self.jitter_ratio)
    }
}

/// Multiply at nanosecond precision, rounding to the nearest nanosecond.
fn scale(d: Duration, factor: f64) -> Duration {
    let nanos = (d.as_nanos() as f64 * factor.max(0.0)).round();
    Duration::from_nanos(nanos.min(u64::MAX as f64) as u64)
}

/// Options for [`retry_transient`] (and `fetch_with_retry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryOptions {
    /// Quick retry for interactive requests (don't block the user for long).
    #[must_use]
    pub fn interactive() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }

    /// Background work can afford to wait.
    #[must_use]
    pub fn background() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.base_delay, self.max_delay)
    }
}

/// Run `operation` with a per-attempt deadline, retrying retryable failures.
///
/// Non-retryable failures (4xx validation) return immediately. After the
/// retry budget is spent, the last error is returned.
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    options: &RetryOptions,
    attempt_timeout: Duration,
    mut operation: F,
) -> Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let backoff = options.backoff();
    let mut attempt: u32 = 0;

    loop {
        let result = match timeout(attempt_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(RequestError::Timeout(attempt_timeout)),
        };

        match result {
            Ok(val) => {
                if attempt > 0 {
                    info!(operation = operation_name, retries = attempt, "Operation succeeded after retries");
                }
                crate::metrics::record_request(operation_name, "success");
                return Ok(val);
            }
            Err(err) if !err.is_retryable() => {
                debug!(operation = operation_name, error = %err, "Non-retryable failure, giving up");
                crate::metrics::record_request(operation_name, "permanent");
                return Err(err);
            }
            Err(err) => {
                if attempt >= options.max_retries {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %err,
                        "Retry budget exhausted"
                    );
                    crate::metrics::record_request(operation_name, "exhausted");
                    return Err(err);
                }

                let delay = backoff.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_retries = options.max_retries,
                    error = %err,
                    "Transient failure, retrying in {:?}",
                    delay
                );
                crate::metrics::record_request_retry(operation_name);
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
