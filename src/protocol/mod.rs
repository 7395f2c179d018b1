//! Protocol module for parsing and constructing scale payloads.
//!
//! This module contains the implementations for:
//! - Weight notification decoding
//! - Control response parsing
//! - License key validation
//! - Buzzer and control command payloads

pub mod commands;
pub mod control;
pub mod license;
pub mod weight;

pub use commands::{BuzzerCommand, ParseBuzzerCommandError, DISCONNECT_COMMAND};
pub use control::{ControlCode, ControlOutcome, DeviceErrorReason};
pub use license::{is_valid_license_key, LicenseKey};
pub use weight::{decode_weight, WeightRejection, WeightSample, DEFAULT_UNIT};
