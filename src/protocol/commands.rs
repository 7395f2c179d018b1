//! Command payloads written to the scale.

use thiserror::Error;

/// Written to the control characteristic to end an authenticated session.
pub const DISCONNECT_COMMAND: &str = "DISCONNECT";

/// Buzzer patterns understood by the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BuzzerCommand {
    /// Short beep.
    Beep,
    /// Buzz pattern.
    Buzz,
    /// Long tone.
    Long,
    /// Silence the buzzer.
    Off,
}

impl BuzzerCommand {
    /// All buzzer commands.
    pub const ALL: [Self; 4] = [Self::Beep, Self::Buzz, Self::Long, Self::Off];

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beep => "BEEP",
            Self::Buzz => "BUZZ",
            Self::Long => "LONG",
            Self::Off => "OFF",
        }
    }

    /// Bytes written to the buzzer characteristic.
    pub fn to_payload(&self) -> Vec<u8> {
        self.as_str().as_bytes().to_vec()
    }
}

impl std::fmt::Display for BuzzerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown buzzer command name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown buzzer command: {0}")]
pub struct ParseBuzzerCommandError(String);

impl std::str::FromStr for BuzzerCommand {
    type Err = ParseBuzzerCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BEEP" => Ok(Self::Beep),
            "BUZZ" => Ok(Self::Buzz),
            "LONG" => Ok(Self::Long),
            "OFF" => Ok(Self::Off),
            _ => Err(ParseBuzzerCommandError(s.to_string())),
        }
    }
}
