//! Scale discovery.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::ble::connection::ConnectionState;
use crate::ble::transport::{AdvertisementStream, BleTransport, PeripheralRef};
use crate::ble::uuids::is_scale_name;

use super::Inner;

enum Step {
    Advertisement(Option<PeripheralRef>),
    Deadline,
    Superseded,
}

/// A running scan for KGiTON scales.
///
/// Yields each scale once, the first time it is seen; later sightings only
/// refresh its signal strength in [`discovered`](Self::discovered). The scan
/// ends at its deadline, when [`ScaleSession::stop_scan`](crate::ScaleSession::stop_scan)
/// is called, when another scan or a connection attempt takes over, or when
/// the transport stops reporting. Dropping it early stops the radio scan.
pub struct DeviceScan<T: BleTransport> {
    inner: Arc<Inner<T>>,
    epoch: u64,
    epoch_rx: watch::Receiver<u64>,
    advertisements: AdvertisementStream,
    deadline: Instant,
    discovered: HashMap<String, PeripheralRef>,
    finished: bool,
}

impl<T: BleTransport> DeviceScan<T> {
    pub(crate) fn new(
        inner: Arc<Inner<T>>,
        epoch: u64,
        advertisements: AdvertisementStream,
        deadline: Instant,
    ) -> Self {
        let epoch_rx = inner.machine.watch_epoch();
        Self {
            inner,
            epoch,
            epoch_rx,
            advertisements,
            deadline,
            discovered: HashMap::new(),
            finished: false,
        }
    }

    /// Wait for the next newly discovered scale.
    ///
    /// Returns `None` once the scan has ended.
    pub async fn next(&mut self) -> Option<PeripheralRef> {
        while !self.finished {
            if *self.epoch_rx.borrow() != self.epoch {
                debug!("Scan superseded");
                self.finished = true;
                break;
            }

            let step = tokio::select! {
                biased;
                _ = superseded(&mut self.epoch_rx, self.epoch) => Step::Superseded,
                advertisement = self.advertisements.next() => Step::Advertisement(advertisement),
                _ = tokio::time::sleep_until(self.deadline) => Step::Deadline,
            };

            match step {
                Step::Advertisement(Some(peripheral)) => {
                    if let Some(new) = self.record(peripheral) {
                        return Some(new);
                    }
                }
                Step::Advertisement(None) => {
                    debug!("Transport ended the scan");
                    self.finish().await;
                }
                Step::Deadline => {
                    debug!("Scan window elapsed");
                    self.finish().await;
                }
                Step::Superseded => {
                    debug!("Scan superseded");
                    self.finished = true;
                }
            }
        }

        None
    }

    /// Scales seen so far with their latest signal strength, strongest first.
    pub fn discovered(&self) -> Vec<PeripheralRef> {
        let mut scales: Vec<_> = self.discovered.values().cloned().collect();
        scales.sort_by(|a, b| b.rssi.cmp(&a.rssi).then_with(|| a.id.cmp(&b.id)));
        scales
    }

    /// Run the scan to completion and return every scale found.
    pub async fn collect_all(mut self) -> Vec<PeripheralRef> {
        while self.next().await.is_some() {}
        self.discovered()
    }

    /// Whether the scan has ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Convert into a [`futures::Stream`] of newly discovered scales.
    pub fn into_stream(self) -> BoxStream<'static, PeripheralRef> {
        futures::stream::unfold(self, |mut scan| async move {
            scan.next().await.map(|peripheral| (peripheral, scan))
        })
        .boxed()
    }

    /// Returns the peripheral if this is its first sighting.
    fn record(&mut self, peripheral: PeripheralRef) -> Option<PeripheralRef> {
        if !is_scale_name(&peripheral.name) {
            trace!("Ignoring non-scale device {:?}", peripheral.name);
            return None;
        }

        self.inner
            .sightings
            .write()
            .insert(peripheral.id.clone(), peripheral.rssi);

        match self.discovered.insert(peripheral.id.clone(), peripheral.clone()) {
            Some(_) => {
                trace!("Updated {} (RSSI {})", peripheral.id, peripheral.rssi);
                None
            }
            None => {
                info!(
                    "Discovered scale {} ({}, RSSI {})",
                    peripheral.name, peripheral.id, peripheral.rssi
                );
                Some(peripheral)
            }
        }
    }

    async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if self
            .inner
            .machine
            .advance(self.epoch, ConnectionState::Disconnected)
        {
            if let Err(e) = self.inner.transport.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }
    }
}

impl<T: BleTransport> Drop for DeviceScan<T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if !self
            .inner
            .machine
            .advance(self.epoch, ConnectionState::Disconnected)
        {
            return;
        }

        let transport = self.inner.transport.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = transport.stop_scan().await {
                        warn!("Failed to stop abandoned scan: {}", e);
                    }
                });
            }
            Err(_) => warn!("Scan dropped outside a runtime, radio scan not stopped"),
        }
    }
}

impl<T: BleTransport> std::fmt::Debug for DeviceScan<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceScan")
            .field("epoch", &self.epoch)
            .field("discovered", &self.discovered.len())
            .field("finished", &self.finished)
            .finish()
    }
}

/// Resolves once the session epoch moves past `epoch`.
async fn superseded(rx: &mut watch::Receiver<u64>, epoch: u64) {
    loop {
        if *rx.borrow() != epoch {
            return;
        }
        if rx.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}
