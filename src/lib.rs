// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # kgiton-ble
//!
//! A cross-platform Rust client for KGiTON Bluetooth Low Energy weighing
//! scales.
//!
//! ## Features
//!
//! - **Scale Discovery**: Scan for nearby scales advertising as `KGiTON`
//! - **License Authentication**: Unlock a scale with its license key
//! - **Weight Streaming**: Receive validated weight samples in real time
//! - **Buzzer Control**: Sound the scale's buzzer with acknowledgement
//! - **Retries**: Exponential backoff around every radio operation
//! - **Connection Health**: Track uptime, signal strength and drops
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use futures::StreamExt;
//! use kgiton_ble::{BtleplugTransport, Result, ScaleSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = ScaleSession::new(BtleplugTransport::new().await?);
//!
//!     // Find the strongest scale nearby
//!     let scales = session
//!         .scan_for_devices(Duration::from_secs(5))
//!         .await?
//!         .collect_all()
//!         .await;
//!
//!     if let Some(scale) = scales.first() {
//!         session
//!             .connect_with_license_key(&scale.id, "ABCDE-FGHIJ-KLMNO-PQRST-UVWXY")
//!             .await?;
//!
//!         let mut weights = session.weight_stream()?.take(10);
//!         while let Some(sample) = weights.next().await {
//!             println!("{}", sample);
//!         }
//!
//!         session.disconnect().await?;
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod stability;
pub mod storage;

// Re-exports for convenience
pub use config::{ConnectOptions, SessionConfig};
pub use error::{Error, ErrorKind, Result};
pub use events::{CallbackHandle, EventReceiver, SessionEvent};
pub use retry::{with_retry, with_timeout, RetryConfig};
pub use session::{DeviceScan, ScaleSession, WeightStream};
pub use stability::{ConnectionMetrics, ConnectionStabilityTracker};
pub use storage::{KeyValueStore, MemoryStore};

// Re-export commonly used types from submodules
pub use ble::connection::{ConnectionState, StateChange};
pub use ble::platform::BtleplugTransport;
pub use ble::transport::{BleTransport, PeripheralRef};
pub use protocol::{BuzzerCommand, ControlCode, ControlOutcome, LicenseKey, WeightSample};
