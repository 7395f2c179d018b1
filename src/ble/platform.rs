//! [`BleTransport`] implementation backed by `btleplug`.
//!
//! Works on macOS (CoreBluetooth), Linux (BlueZ) and Windows (WinRT).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::future;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{AdvertisementStream, BleTransport, NotificationStream, PeripheralRef};
use crate::ble::uuids::{
    is_scale_characteristic, CONTROL_CHARACTERISTIC_UUID, DATA_CHARACTERISTIC_UUID,
    SCALE_SERVICE_UUID,
};
use crate::error::{Error, Result};

/// RSSI reported when the platform does not provide one.
pub const UNKNOWN_RSSI: i16 = -127;

/// An established btleplug link.
#[derive(Clone)]
pub struct BtleplugLink {
    peripheral: Peripheral,
    characteristics: Arc<HashMap<Uuid, Characteristic>>,
}

impl BtleplugLink {
    /// The underlying peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    fn characteristic(&self, uuid: &Uuid) -> Result<&Characteristic> {
        self.characteristics
            .get(uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }
}

impl std::fmt::Debug for BtleplugLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugLink")
            .field("peripheral", &self.peripheral.id())
            .field("characteristics", &self.characteristics.len())
            .finish()
    }
}

/// BLE transport using the first available system adapter.
pub struct BtleplugTransport {
    /// The BLE adapter used for scanning and connecting.
    adapter: Adapter,
    /// Peripherals seen while scanning, by identifier.
    peripherals: Arc<RwLock<HashMap<String, Peripheral>>>,
}

impl BtleplugTransport {
    /// Create a transport on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a transport on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn find_peripheral(&self, peripheral_id: &str) -> Result<Peripheral> {
        if let Some(peripheral) = self.peripherals.read().get(peripheral_id).cloned() {
            return Ok(peripheral);
        }

        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.id().to_string() == peripheral_id)
            .ok_or_else(|| Error::PeripheralNotFound {
                identifier: peripheral_id.to_string(),
            })
    }

    /// Resolve an advertisement into a [`PeripheralRef`], caching the peripheral.
    async fn process_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
        peripherals: &RwLock<HashMap<String, Peripheral>>,
    ) -> Option<PeripheralRef> {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        let name = properties.local_name?;
        let identifier = id.to_string();

        peripherals.write().insert(identifier.clone(), peripheral);

        Some(PeripheralRef {
            id: identifier,
            name,
            rssi: properties.rssi.unwrap_or(UNKNOWN_RSSI),
        })
    }
}

/// Keep only the scale characteristics published under the scale service.
fn scale_characteristics(
    discovered: impl IntoIterator<Item = Characteristic>,
) -> HashMap<Uuid, Characteristic> {
    discovered
        .into_iter()
        .filter(|c| {
            debug!("Found characteristic: {} in service {}", c.uuid, c.service_uuid);
            c.service_uuid == SCALE_SERVICE_UUID && is_scale_characteristic(&c.uuid)
        })
        .map(|c| (c.uuid, c))
        .collect()
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    type Link = BtleplugLink;

    async fn scan(&self, timeout: Duration) -> Result<AdvertisementStream> {
        info!("Starting BLE scan for {:?}", timeout);

        let events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();

        let stream = events
            .filter_map(move |event| {
                let adapter = adapter.clone();
                let peripherals = peripherals.clone();
                async move {
                    match event {
                        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                            Self::process_peripheral(&adapter, id, &peripherals).await
                        }
                        _ => None,
                    }
                }
            })
            .take_until(tokio::time::sleep(timeout))
            .boxed();

        Ok(stream)
    }

    async fn stop_scan(&self) -> Result<()> {
        info!("Stopping BLE scan");
        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }

    async fn connect(&self, peripheral_id: &str, timeout: Duration) -> Result<Self::Link> {
        let peripheral = self.find_peripheral(peripheral_id).await?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            match tokio::time::timeout(timeout, peripheral.connect()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::Timeout {
                        operation: "connect".to_string(),
                        timeout,
                    })
                }
            }
        } else {
            info!("Peripheral already connected at BLE level");
        }

        peripheral.discover_services().await?;

        let characteristics = scale_characteristics(peripheral.characteristics());

        for required in [CONTROL_CHARACTERISTIC_UUID, DATA_CHARACTERISTIC_UUID] {
            if !characteristics.contains_key(&required) {
                if let Err(e) = peripheral.disconnect().await {
                    warn!("Failed to disconnect incompatible peripheral: {}", e);
                }
                return Err(Error::CharacteristicNotFound {
                    uuid: required.to_string(),
                });
            }
        }

        debug!("Discovered {} characteristics", characteristics.len());

        Ok(BtleplugLink {
            peripheral,
            characteristics: Arc::new(characteristics),
        })
    }

    async fn write(
        &self,
        link: &Self::Link,
        characteristic: Uuid,
        data: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        let target = link.characteristic(&characteristic)?;

        match tokio::time::timeout(
            timeout,
            link.peripheral.write(target, data, WriteType::WithResponse),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Timeout {
                    operation: format!("write {}", characteristic),
                    timeout,
                })
            }
        }

        trace!("Wrote {} bytes to characteristic {}", data.len(), characteristic);

        Ok(())
    }

    async fn subscribe(
        &self,
        link: &Self::Link,
        characteristic: Uuid,
    ) -> Result<NotificationStream> {
        let target = link.characteristic(&characteristic)?;

        // Take both streams before subscribing so nothing is missed.
        let notifications = link.peripheral.notifications().await?;
        let mut events = self.adapter.events().await?;

        link.peripheral.subscribe(target).await?;
        debug!("Subscribed to notifications from {}", characteristic);

        let peripheral_id = link.peripheral.id();
        let disconnected = async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        debug!("Peripheral {:?} disconnected", id);
                        break;
                    }
                }
            }
        };

        let stream = notifications
            .filter_map(move |notification| {
                future::ready(
                    (notification.uuid == characteristic).then(|| Bytes::from(notification.value)),
                )
            })
            .take_until(disconnected)
            .boxed();

        Ok(stream)
    }

    async fn disconnect(&self, link: &Self::Link) -> Result<()> {
        link.peripheral.disconnect().await?;
        info!("Disconnected from {:?}", link.peripheral.id());
        Ok(())
    }

    async fn read_rssi(&self, link: &Self::Link) -> Result<Option<i16>> {
        let properties = link.peripheral.properties().await?;
        Ok(properties.and_then(|p| p.rssi))
    }
}
