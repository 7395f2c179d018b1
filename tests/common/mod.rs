//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use uuid::Uuid;

use kgiton_ble::ble::transport::{AdvertisementStream, NotificationStream};
use kgiton_ble::ble::uuids::{
    BUZZER_CHARACTERISTIC_UUID, CONTROL_CHARACTERISTIC_UUID, DATA_CHARACTERISTIC_UUID,
};
use kgiton_ble::{BleTransport, Error, PeripheralRef, Result, SessionConfig};

pub const LICENSE_KEY: &str = "ABCDE-FGHIJ-KLMNO-PQRST-UVWXY";

/// Config with short delays so retry paths run quickly.
pub fn fast_config() -> SessionConfig {
    SessionConfig::default()
        .with_command_timeout(Duration::from_millis(500))
        .with_connection_timeout(Duration::from_secs(2))
        .with_retry_base_delay(Duration::from_millis(10))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeLink {
    pub peripheral_id: String,
}

#[derive(Default)]
struct Script {
    adverts: Vec<PeripheralRef>,
    hold_scan_open: bool,
    connect_failures: u32,
    connect_delay: Option<Duration>,
    auth_response: Option<String>,
    buzzer_response: Option<String>,
    rssi: Option<i16>,

    connect_calls: u32,
    stop_scans: u32,
    disconnects: u32,
    writes: Vec<(Uuid, String)>,
    control_tx: Option<UnboundedSender<Bytes>>,
    data_tx: Option<UnboundedSender<Bytes>>,
}

/// A scale that answers the way the test tells it to.
#[derive(Clone, Default)]
pub struct FakeTransport {
    script: Arc<Mutex<Script>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_advert(self, id: &str, name: &str, rssi: i16) -> Self {
        self.script
            .lock()
            .adverts
            .push(PeripheralRef::new(id, name, rssi));
        self
    }

    /// Keep the scan running after the scripted adverts.
    pub fn holding_scan_open(self) -> Self {
        self.script.lock().hold_scan_open = true;
        self
    }

    pub fn failing_connects(self, failures: u32) -> Self {
        self.script.lock().connect_failures = failures;
        self
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.script.lock().connect_delay = Some(delay);
        self
    }

    /// Reply to the license key write with `response`.
    pub fn answering_auth(self, response: &str) -> Self {
        self.script.lock().auth_response = Some(response.to_string());
        self
    }

    pub fn accepting_key(self) -> Self {
        self.answering_auth("CONNECTED")
    }

    /// Reply to buzzer writes with `response`.
    pub fn answering_buzzer(self, response: &str) -> Self {
        self.script.lock().buzzer_response = Some(response.to_string());
        self
    }

    pub fn with_rssi(self, rssi: i16) -> Self {
        self.script.lock().rssi = Some(rssi);
        self
    }

    /// Deliver a raw data notification.
    pub fn push_data(&self, payload: &str) {
        if let Some(tx) = self.script.lock().data_tx.as_ref() {
            let _ = tx.unbounded_send(Bytes::copy_from_slice(payload.as_bytes()));
        }
    }

    /// Deliver an unsolicited control notification.
    pub fn push_control(&self, payload: &str) {
        if let Some(tx) = self.script.lock().control_tx.as_ref() {
            let _ = tx.unbounded_send(Bytes::copy_from_slice(payload.as_bytes()));
        }
    }

    /// Simulate the scale going out of range.
    pub fn drop_link(&self) {
        let mut script = self.script.lock();
        script.data_tx = None;
        script.control_tx = None;
    }

    pub fn connect_calls(&self) -> u32 {
        self.script.lock().connect_calls
    }

    pub fn stop_scans(&self) -> u32 {
        self.script.lock().stop_scans
    }

    pub fn disconnects(&self) -> u32 {
        self.script.lock().disconnects
    }

    pub fn writes(&self) -> Vec<(Uuid, String)> {
        self.script.lock().writes.clone()
    }

    pub fn writes_to(&self, characteristic: Uuid) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter(|(uuid, _)| *uuid == characteristic)
            .map(|(_, payload)| payload)
            .collect()
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    type Link = FakeLink;

    async fn scan(&self, _timeout: Duration) -> Result<AdvertisementStream> {
        let script = self.script.lock();
        let adverts = stream::iter(script.adverts.clone());
        if script.hold_scan_open {
            Ok(adverts.chain(stream::pending()).boxed())
        } else {
            Ok(adverts.boxed())
        }
    }

    async fn stop_scan(&self) -> Result<()> {
        self.script.lock().stop_scans += 1;
        Ok(())
    }

    async fn connect(&self, peripheral_id: &str, _timeout: Duration) -> Result<FakeLink> {
        let delay = {
            let mut script = self.script.lock();
            script.connect_calls += 1;
            if script.connect_failures > 0 {
                script.connect_failures -= 1;
                return Err(Error::transport("peripheral out of range"));
            }
            script.connect_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(FakeLink {
            peripheral_id: peripheral_id.to_string(),
        })
    }

    async fn write(
        &self,
        _link: &FakeLink,
        characteristic: Uuid,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<()> {
        let mut script = self.script.lock();
        let payload = String::from_utf8_lossy(data).into_owned();
        script.writes.push((characteristic, payload.clone()));

        let reply = if characteristic == BUZZER_CHARACTERISTIC_UUID {
            script.buzzer_response.clone()
        } else if characteristic == CONTROL_CHARACTERISTIC_UUID {
            if payload == "DISCONNECT" {
                Some("DISCONNECTED".to_string())
            } else {
                script.auth_response.clone()
            }
        } else {
            None
        };

        if let (Some(reply), Some(tx)) = (reply, script.control_tx.as_ref()) {
            let _ = tx.unbounded_send(Bytes::from(reply));
        }

        Ok(())
    }

    async fn subscribe(&self, _link: &FakeLink, characteristic: Uuid) -> Result<NotificationStream> {
        let (tx, rx) = unbounded();
        let mut script = self.script.lock();

        if characteristic == CONTROL_CHARACTERISTIC_UUID {
            script.control_tx = Some(tx);
        } else if characteristic == DATA_CHARACTERISTIC_UUID {
            script.data_tx = Some(tx);
        } else {
            return Err(Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            });
        }

        Ok(rx.boxed())
    }

    async fn disconnect(&self, _link: &FakeLink) -> Result<()> {
        let mut script = self.script.lock();
        script.disconnects += 1;
        script.data_tx = None;
        script.control_tx = None;
        Ok(())
    }

    async fn read_rssi(&self, _link: &FakeLink) -> Result<Option<i16>> {
        Ok(self.script.lock().rssi)
    }
}
