//! Error types for the kgiton-ble crate.

use std::time::Duration;

use thiserror::Error;

use crate::ble::connection::ConnectionState;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// A radio or GATT level failure reported by the transport.
    #[error("Transport error: {reason}")]
    Transport {
        /// Description of the failure.
        reason: String,
    },

    /// The specified peripheral is unknown to the transport.
    #[error("Peripheral not found: {identifier}")]
    PeripheralNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// An operation did not finish before its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The license key is not of the form `XXXXX-XXXXX-XXXXX-XXXXX-XXXXX`.
    #[error("Invalid license key format: {reason}")]
    LicenseFormat {
        /// Why the key was rejected.
        reason: String,
    },

    /// The scale rejected the license key or answered with something unexpected.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Message derived from the scale's response.
        message: String,
    },

    /// The session is in a state that does not allow the operation.
    #[error("Cannot {operation} while {state}")]
    State {
        /// The operation that was attempted.
        operation: String,
        /// The state the session was in.
        state: ConnectionState,
    },

    /// The key-value store failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Closed classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// Radio/GATT failure. Retryable.
    Transport,
    /// Deadline exceeded. Retryable up to the retry policy.
    Timeout,
    /// License key rejected before reaching the transport.
    LicenseFormat,
    /// The device refused the key or answered unexpectedly.
    Authentication,
    /// Operation invoked in an incompatible session state.
    State,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => write!(f, "Transport"),
            Self::Timeout => write!(f, "Timeout"),
            Self::LicenseFormat => write!(f, "LicenseFormat"),
            Self::Authentication => write!(f, "Authentication"),
            Self::State => write!(f, "State"),
        }
    }
}

impl Error {
    /// Shorthand for a [`Error::Transport`] error.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`Error::State`] error.
    pub fn state(operation: impl Into<String>, state: ConnectionState) -> Self {
        Self::State {
            operation: operation.into(),
            state,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Bluetooth(_)
            | Self::BluetoothUnavailable
            | Self::Transport { .. }
            | Self::PeripheralNotFound { .. }
            | Self::CharacteristicNotFound { .. }
            | Self::Storage(_) => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::LicenseFormat { .. } => ErrorKind::LicenseFormat,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::State { .. } => ErrorKind::State,
        }
    }

    /// Whether a retry policy may attempt the operation again.
    ///
    /// Storage failures are reported as transport errors but are never
    /// retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(_) => false,
            _ => matches!(self.kind(), ErrorKind::Transport | ErrorKind::Timeout),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
