//! Remote call retry logic
//!
//! Exponential backoff around a fallible async operation. Whether a failure
//! is worth another attempt is decided by a caller-supplied classifier, so
//! the backoff loop knows nothing about HTTP status codes or error types.
//!
//! **Backoff Strategy:**
//! - Delay before attempt `n + 1`: `initial_backoff * multiplier^(n - 1)`
//! - Capped at `max_backoff`
//! - At most `max_attempts` attempts in total

use csvl_common::config::RetryConfig;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

/// Classifier verdict for a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Transient failure: back off and try again
    Retry,
    /// Permanent failure: give up now
    Abort,
}

/// Backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
        }
    }

    /// Policy without delays (tests, dry runs)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Successful result plus the attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Final error after the loop gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
    /// The classifier stopped the loop (as opposed to running out of attempts)
    pub aborted: bool,
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts > 1 {
            write!(f, "{} (after {} attempts)", self.error, self.attempts)
        } else {
            write!(f, "{}", self.error)
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryFailure<E> {}

/// Run `operation` until it succeeds, the classifier aborts, or attempts run out
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "upsert product")
/// * `policy` - Attempt budget and backoff shape
/// * `classify` - Maps a failure to [`RetryDecision`]
/// * `operation` - Closure producing a fresh attempt future
pub async fn retry_with<F, Fut, T, E, C>(
    operation_name: &str,
    policy: &RetryPolicy,
    classify: C,
    mut operation: F,
) -> Result<Retried<T>, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryDecision,
    E: fmt::Display,
{
    let start_time = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying remote operation");
        }

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Remote operation succeeded after retry"
                    );
                }
                return Ok(Retried {
                    value,
                    attempts: attempt,
                });
            }
            Err(error) => {
                if classify(&error) == RetryDecision::Abort {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        error = %error,
                        "Remote operation rejected, not retrying"
                    );
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                        aborted: true,
                    });
                }

                if attempt >= max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %error,
                        "Remote operation failed: retry budget exhausted"
                    );
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                        aborted: false,
                    });
                }

                let backoff = policy.backoff_after(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "Transient remote failure, will retry after backoff"
                );

                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
