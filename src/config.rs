//! Session configuration.

use std::time::Duration;

use crate::retry::RetryConfig;

/// Tunables for a [`ScaleSession`](crate::ScaleSession).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use kgiton_ble::SessionConfig;
///
/// let config = SessionConfig::default()
///     .with_command_timeout(Duration::from_secs(2))
///     .with_max_retry_attempts(5);
/// assert_eq!(config.retry_config().max_attempts, 5);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// How long a scan runs before it stops on its own.
    pub scan_timeout: Duration,
    /// Deadline for a single transport connect attempt.
    pub connection_timeout: Duration,
    /// Deadline for a command write and for awaiting its response.
    pub command_timeout: Duration,
    /// Minimum spacing between delivered weight samples. Zero disables throttling.
    pub data_throttle: Duration,
    /// Attempts per connect or write, including the first.
    pub max_retry_attempts: u32,
    /// Delay before the first retry.
    pub retry_base_delay: Duration,
    /// Growth factor of the retry delay.
    pub backoff_multiplier: f64,
    /// How often RSSI is polled while authenticated.
    pub signal_poll_interval: Duration,
}

impl SessionConfig {
    /// Default scan window (10 seconds).
    pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default connect deadline (15 seconds).
    pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(15);
    /// Default command deadline (5 seconds).
    pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default RSSI poll interval (5 seconds).
    pub const DEFAULT_SIGNAL_POLL_INTERVAL: Duration = Duration::from_secs(5);

    /// Set the scan timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the data throttle interval.
    pub fn with_data_throttle(mut self, interval: Duration) -> Self {
        self.data_throttle = interval;
        self
    }

    /// Set the maximum number of attempts per retried operation.
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts.max(1);
        self
    }

    /// Set the base retry delay.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the RSSI poll interval.
    pub fn with_signal_poll_interval(mut self, interval: Duration) -> Self {
        self.signal_poll_interval = interval;
        self
    }

    /// The retry policy derived from this configuration.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_retry_attempts,
            self.retry_base_delay,
            self.backoff_multiplier,
        )
    }

    /// Apply per-call overrides.
    pub(crate) fn merged(&self, options: &ConnectOptions) -> Self {
        let mut config = self.clone();
        if let Some(timeout) = options.connection_timeout {
            config.connection_timeout = timeout;
        }
        if let Some(timeout) = options.command_timeout {
            config.command_timeout = timeout;
        }
        if let Some(attempts) = options.max_retry_attempts {
            config.max_retry_attempts = attempts.max(1);
        }
        if let Some(delay) = options.retry_base_delay {
            config.retry_base_delay = delay;
        }
        config
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Self::DEFAULT_SCAN_TIMEOUT,
            connection_timeout: Self::DEFAULT_CONNECTION_TIMEOUT,
            command_timeout: Self::DEFAULT_COMMAND_TIMEOUT,
            data_throttle: Duration::ZERO,
            max_retry_attempts: 3,
            retry_base_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            signal_poll_interval: Self::DEFAULT_SIGNAL_POLL_INTERVAL,
        }
    }
}

/// Per-call overrides for a connection attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectOptions {
    /// Override [`SessionConfig::connection_timeout`].
    pub connection_timeout: Option<Duration>,
    /// Override [`SessionConfig::command_timeout`].
    pub command_timeout: Option<Duration>,
    /// Override [`SessionConfig::max_retry_attempts`].
    pub max_retry_attempts: Option<u32>,
    /// Override [`SessionConfig::retry_base_delay`].
    pub retry_base_delay: Option<Duration>,
}
