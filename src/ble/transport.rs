//! Transport abstraction consumed by the session.
//!
//! The session never talks to a radio directly. It drives a [`BleTransport`]
//! which scans, connects, writes and subscribes.
//! [`BtleplugTransport`](crate::ble::platform::BtleplugTransport) is the
//! production implementation; tests provide their own.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::Result;

/// A peripheral seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralRef {
    /// Transport-specific identifier, used to connect.
    pub id: String,
    /// Advertised local name.
    pub name: String,
    /// Signal strength in dBm.
    pub rssi: i16,
}

impl PeripheralRef {
    /// Create a new peripheral reference.
    pub fn new(id: impl Into<String>, name: impl Into<String>, rssi: i16) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rssi,
        }
    }
}

/// Stream of advertisements produced by [`BleTransport::scan`].
pub type AdvertisementStream = BoxStream<'static, PeripheralRef>;

/// Stream of characteristic notifications produced by [`BleTransport::subscribe`].
///
/// The stream ends when the link drops or the subscription is cancelled.
pub type NotificationStream = BoxStream<'static, Bytes>;

/// Radio-level capabilities the session needs.
#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    /// Handle to an established link.
    type Link: Clone + Send + Sync + 'static;

    /// Start scanning. The stream ends at `timeout` or after [`stop_scan`](Self::stop_scan).
    async fn scan(&self, timeout: Duration) -> Result<AdvertisementStream>;

    /// Stop an active scan and release the radio.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to a peripheral and discover its services.
    async fn connect(&self, peripheral_id: &str, timeout: Duration) -> Result<Self::Link>;

    /// Write `data` to a characteristic, waiting for the GATT acknowledgement.
    async fn write(
        &self,
        link: &Self::Link,
        characteristic: Uuid,
        data: &[u8],
        timeout: Duration,
    ) -> Result<()>;

    /// Subscribe to notifications from a characteristic.
    async fn subscribe(&self, link: &Self::Link, characteristic: Uuid)
        -> Result<NotificationStream>;

    /// Tear down the link.
    async fn disconnect(&self, link: &Self::Link) -> Result<()>;

    /// Current signal strength of the link, if the platform reports it.
    async fn read_rssi(&self, _link: &Self::Link) -> Result<Option<i16>> {
        Ok(None)
    }
}
