//! Retry and timeout wrappers for unreliable radio operations.
//!
//! [`with_retry`] re-runs a fallible async operation with exponential
//! backoff; [`with_timeout`] bounds a single attempt. They compose:
//!
//! ```rust,no_run
//! # use std::time::Duration;
//! # use kgiton_ble::retry::{with_retry, with_timeout, RetryConfig};
//! # async fn connect() -> kgiton_ble::Result<()> { Ok(()) }
//! # async fn run() -> kgiton_ble::Result<()> {
//! let config = RetryConfig::default();
//! with_retry(&config, "connect", || {
//!     with_timeout(Duration::from_secs(15), "connect", connect())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Backoff policy for [`with_retry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Factor applied to the delay after each failed attempt. At least 1.0.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a retry policy. Out-of-range values are clamped.
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_multiplier: if backoff_multiplier.is_finite() {
                backoff_multiplier.max(1.0)
            } else {
                1.0
            },
        }
    }

    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// Saturates at [`Duration::MAX`] instead of overflowing.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` is reached.
///
/// On exhaustion the error from the final attempt is returned.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!("{}: attempt {} of {}", name, attempt, max_attempts);

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                warn!("{}: giving up after {} attempts: {}", name, attempt, e);
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_after(attempt);
                warn!(
                    "{}: attempt {} failed ({}), retrying in {:?}",
                    name, attempt, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Race `future` against a deadline.
///
/// Returns [`Error::Timeout`] if `timeout` elapses first. The future is
/// dropped at that point whether or not it supports cancellation.
pub async fn with_timeout<T, Fut>(timeout: Duration, name: &str, future: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: name.to_string(),
            timeout,
        }),
    }
}
