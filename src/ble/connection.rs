//! Session connection state.
//!
//! Tracks where a [`ScaleSession`](crate::ScaleSession) is in its
//! scan → connect → authenticate lifecycle.

/// Connection state of a scale session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No link to a scale. The rest state.
    #[default]
    Disconnected,
    /// Looking for scales.
    Scanning,
    /// Establishing the BLE link.
    Connecting,
    /// BLE link is up, license key not yet accepted.
    Connected,
    /// The scale accepted the license key.
    Authenticated,
    /// The last connection attempt or command failed.
    Error(String),
}

impl ConnectionState {
    /// Check if a BLE link is established.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated)
    }

    /// Check if the scale accepted the license key.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }

    /// Check if the session is in the error state.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Whether a new connection attempt may start from this state.
    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Scanning | Self::Error(_))
    }

    /// Whether a scan may start from this state.
    pub fn can_scan(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Scanning | Self::Error(_))
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Authenticated => write!(f, "Authenticated"),
            Self::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StateChange {
    /// The state before the transition.
    pub previous: ConnectionState,
    /// The new connection state.
    pub current: ConnectionState,
}
