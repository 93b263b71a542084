//! Retry with exponential backoff for transient storage failures.
//!
//! A reservation transaction that hits a deadlock, a serialization failure or a
//! dropped connection has been rolled back in full, so running it again from
//! the top is safe. Business-rule outcomes are final and are never retried.
//!
//! # Example
//!
//! ```rust
//! use eventbook_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(20))
//!     .max_delay(Duration::from_secs(1))
//!     .build();
//!
//! let value = retry_with_predicate(
//!     &policy,
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("deadlock"),
//! )
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use crate::metrics::RetryMetrics;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 50ms
/// - `max_delay`: 1 second
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::builder().max_retries(0).build()
    }

    /// Calculate delay for a given attempt number.
    ///
    /// Uses exponential backoff: delay = initial_delay * (multiplier ^ attempt)
    /// Capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);

        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(3),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(50)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(1)),
            multiplier: self.multiplier.unwrap_or(2.0),
        }
    }
}

/// Retry an async operation while `is_retryable` accepts its error.
///
/// Errors rejected by the predicate are returned immediately and silently:
/// deciding whether they deserve a log line is the caller's business.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once
/// `policy.max_retries` retries are exhausted.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Transaction succeeded after retry");
                    RetryMetrics::record_success();
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    tracing::warn!(
                        attempt,
                        error = %err,
                        "Transaction failed after max retries"
                    );
                    if attempt > 0 {
                        RetryMetrics::record_exhausted();
                    }
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Transaction failed, retrying..."
                );
                RetryMetrics::record_attempt();

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
