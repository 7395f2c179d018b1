//! BLE communication module.
//!
//! This module provides the radio-facing pieces of the crate: the
//! [`BleTransport`] abstraction, its btleplug implementation and the GATT
//! identifiers of KGiTON scales.

pub mod connection;
pub mod platform;
pub mod transport;
pub mod uuids;

pub use connection::{ConnectionState, StateChange};
pub use platform::BtleplugTransport;
pub use transport::{AdvertisementStream, BleTransport, NotificationStream, PeripheralRef};
pub use uuids::*;
