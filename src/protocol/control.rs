//! Control characteristic response parsing.
//!
//! After every control or buzzer command the scale writes a short ASCII
//! status back on the control characteristic:
//!
//! | Response | Meaning |
//! |---|---|
//! | `CONNECTED` | license key accepted |
//! | `ALREADY_CONNECTED` | key accepted earlier, session still open |
//! | `DISCONNECTED` | disconnect command accepted |
//! | `ALREADY_DISCONNECTED` | nothing to disconnect |
//! | `ERROR:<reason>` | command rejected |
//!
//! Parsing is total: every input yields exactly one [`ControlOutcome`].

use chrono::{DateTime, Utc};

const ERROR_PREFIX: &str = "ERROR:";

/// Reason token carried by an `ERROR:` response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceErrorReason {
    /// `ERROR:INVALID_KEY`.
    InvalidKey,
    /// `ERROR:INVALID_FORMAT`.
    InvalidFormat,
    /// `ERROR:UNKNOWN_COMMAND`.
    UnknownCommand,
    /// Any other reason token.
    Other(String),
}

impl DeviceErrorReason {
    fn from_token(token: &str) -> Self {
        match token {
            "INVALID_KEY" => Self::InvalidKey,
            "INVALID_FORMAT" => Self::InvalidFormat,
            "UNKNOWN_COMMAND" => Self::UnknownCommand,
            other => Self::Other(other.to_string()),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::InvalidKey => "Invalid license key".to_string(),
            Self::InvalidFormat => "Invalid command format".to_string(),
            Self::UnknownCommand => "Unknown command".to_string(),
            Self::Other(reason) => format!("Device error: {}", reason),
        }
    }
}

/// Recognized control response code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ControlCode {
    /// `CONNECTED`.
    Connected,
    /// `ALREADY_CONNECTED`.
    AlreadyConnected,
    /// `DISCONNECTED`.
    Disconnected,
    /// `ALREADY_DISCONNECTED`.
    AlreadyDisconnected,
    /// `ERROR:<reason>`.
    Error(DeviceErrorReason),
    /// Anything else, with the raw text.
    Unrecognized(String),
}

impl ControlCode {
    /// Whether this code grants an authenticated session.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Connected | Self::AlreadyConnected)
    }

    fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Connected | Self::AlreadyConnected | Self::Disconnected | Self::AlreadyDisconnected
        )
    }

    fn message(&self) -> String {
        match self {
            Self::Connected => "License key accepted, scale connected".to_string(),
            Self::AlreadyConnected => "Scale already connected".to_string(),
            Self::Disconnected => "Scale disconnected".to_string(),
            Self::AlreadyDisconnected => "Scale already disconnected".to_string(),
            Self::Error(reason) => reason.message(),
            Self::Unrecognized(raw) => format!("Unrecognized response: {:?}", raw),
        }
    }
}

/// Decoded result of a control command.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControlOutcome {
    /// Whether the scale accepted the command.
    pub success: bool,
    /// Human readable description.
    pub message: String,
    /// The recognized response code.
    pub code: ControlCode,
    /// When the response was parsed.
    pub observed_at: DateTime<Utc>,
}

impl ControlOutcome {
    /// Parse a control response.
    ///
    /// # Example
    ///
    /// ```
    /// use kgiton_ble::protocol::ControlOutcome;
    ///
    /// let outcome = ControlOutcome::parse("ERROR:INVALID_KEY");
    /// assert!(!outcome.success);
    /// assert_eq!(outcome.message, "Invalid license key");
    /// ```
    pub fn parse(response: &str) -> Self {
        let code = parse_code(response);
        Self {
            success: code.is_success(),
            message: code.message(),
            code,
            observed_at: Utc::now(),
        }
    }

    /// Parse raw notification bytes, decoding invalid UTF-8 lossily.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(data))
    }
}

fn parse_code(response: &str) -> ControlCode {
    let text = response.trim_matches(|c: char| c.is_whitespace() || c == '\0');

    match text {
        "CONNECTED" => ControlCode::Connected,
        "ALREADY_CONNECTED" => ControlCode::AlreadyConnected,
        "DISCONNECTED" => ControlCode::Disconnected,
        "ALREADY_DISCONNECTED" => ControlCode::AlreadyDisconnected,
        _ => match text.strip_prefix(ERROR_PREFIX) {
            Some(reason) => ControlCode::Error(DeviceErrorReason::from_token(reason.trim())),
            None => ControlCode::Unrecognized(text.to_string()),
        },
    }
}
