//! Scale session orchestration.
//!
//! [`ScaleSession`] drives one scale through discovery, connection, license
//! authentication, weight streaming and teardown on top of any
//! [`BleTransport`].
//!
//! # Example
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use kgiton_ble::{BtleplugTransport, ScaleSession};
//!
//! #[tokio::main]
//! async fn main() -> kgiton_ble::Result<()> {
//!     let session = ScaleSession::new(BtleplugTransport::new().await?);
//!
//!     let mut scan = session.start_scan().await?;
//!     if let Some(scale) = scan.next().await {
//!         drop(scan);
//!         session
//!             .connect_with_license_key(&scale.id, "ABCDE-FGHIJ-KLMNO-PQRST-UVWXY")
//!             .await?;
//!
//!         let mut weights = session.weight_stream()?;
//!         while let Some(sample) = weights.next().await {
//!             println!("{}", sample);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

mod link;
mod scan;
mod state;

pub use link::WeightStream;
pub use scan::DeviceScan;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::ble::connection::{ConnectionState, StateChange};
use crate::ble::transport::{BleTransport, NotificationStream};
use crate::ble::uuids::{
    BUZZER_CHARACTERISTIC_UUID, CONTROL_CHARACTERISTIC_UUID, DATA_CHARACTERISTIC_UUID,
};
use crate::config::{ConnectOptions, SessionConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::events::{spawn_listener, CallbackHandle, EventReceiver, SessionEvent};
use crate::protocol::{
    decode_weight, BuzzerCommand, ControlOutcome, LicenseKey, WeightSample, DISCONNECT_COMMAND,
};
use crate::retry::{with_retry, with_timeout};
use crate::stability::{ConnectionMetrics, ConnectionStabilityTracker};
use crate::storage::{self, KeyValueStore};

use self::link::{
    await_response, drain_stale, spawn_response_forwarder, weight_stream, ActiveLink, TaskSet,
    RESPONSE_QUEUE_CAPACITY, WEIGHT_CHANNEL_CAPACITY,
};
use self::state::StateMachine;

/// Reason recorded when a connect future is dropped before it finishes.
const ATTEMPT_CANCELLED: &str = "connection attempt cancelled";

pub(crate) struct Inner<T: BleTransport> {
    pub(crate) transport: Arc<T>,
    pub(crate) config: SessionConfig,
    pub(crate) machine: StateMachine,
    /// Last advertised RSSI per peripheral id.
    pub(crate) sightings: RwLock<HashMap<String, i16>>,
    link: Mutex<Option<ActiveLink<T::Link>>>,
    tracker: Mutex<ConnectionStabilityTracker>,
    key_store: RwLock<Option<Arc<dyn KeyValueStore>>>,
    callback_counter: AtomicU64,
}

impl<T: BleTransport> Inner<T> {
    /// Move to the error state and publish the failure, if `epoch` still owns the session.
    fn fail(&self, epoch: u64, error: &Error) {
        if self
            .machine
            .advance(epoch, ConnectionState::Error(error.to_string()))
        {
            self.machine.emit_error(error);
        }
    }

    /// Best-effort transport teardown.
    async fn release(&self, link: &T::Link) {
        let timeout = self.config.connection_timeout;
        if let Err(e) = with_timeout(timeout, "disconnect", self.transport.disconnect(link)).await {
            warn!("Failed to disconnect: {}", e);
        }
    }

    async fn stop_transport_scan(&self) {
        if let Err(e) = self.transport.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
    }

    /// Take the active link if it belongs to `epoch`.
    fn take_link(&self, epoch: u64) -> Option<ActiveLink<T::Link>> {
        let mut slot = self.link.lock();
        if slot.as_ref().map(|active| active.epoch) == Some(epoch) {
            slot.take()
        } else {
            None
        }
    }

    /// The data stream ended on its own: the scale went away.
    fn handle_link_loss(&self, epoch: u64) {
        let Some(active) = self.take_link(epoch) else {
            return;
        };

        warn!("Lost connection to {}", active.peripheral_id);
        self.tracker.lock().record_disconnect(&active.peripheral_id);
        self.machine.advance(epoch, ConnectionState::Disconnected);
    }

    /// A command on an authenticated link failed for good.
    async fn handle_command_failure(&self, epoch: u64, error: &Error) {
        if let Some(active) = self.take_link(epoch) {
            self.tracker.lock().record_disconnect(&active.peripheral_id);
            self.fail(epoch, error);
            self.release(&active.link).await;
        }
    }
}

/// Tears down a connect attempt whose future was dropped midway.
struct AttemptGuard<T: BleTransport> {
    inner: Arc<Inner<T>>,
    epoch: u64,
    link: Option<T::Link>,
    armed: bool,
}

impl<T: BleTransport> AttemptGuard<T> {
    fn new(inner: Arc<Inner<T>>, epoch: u64) -> Self {
        Self {
            inner,
            epoch,
            link: None,
            armed: true,
        }
    }

    fn hold(&mut self, link: T::Link) {
        self.link = Some(link);
    }

    fn disarm(&mut self) {
        self.armed = false;
        self.link = None;
    }
}

impl<T: BleTransport> Drop for AttemptGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        warn!("Connect attempt dropped before completion");
        self.inner.fail(self.epoch, &Error::transport(ATTEMPT_CANCELLED));

        if let Some(link) = self.link.take() {
            let inner = self.inner.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { inner.release(&link).await });
            }
        }
    }
}

/// Client session for one KGiTON scale.
///
/// All methods take `&self`; state-changing calls that overlap are rejected
/// with [`Error::State`] rather than queued. Cloning is cheap and clones
/// share the same session.
pub struct ScaleSession<T: BleTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: BleTransport> Clone for ScaleSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: BleTransport> ScaleSession<T> {
    /// Create a session with the default configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    /// Create a session with a custom configuration.
    pub fn with_config(transport: T, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport: Arc::new(transport),
                config,
                machine: StateMachine::new(),
                sightings: RwLock::new(HashMap::new()),
                link: Mutex::new(None),
                tracker: Mutex::new(ConnectionStabilityTracker::new()),
                key_store: RwLock::new(None),
                callback_counter: AtomicU64::new(0),
            }),
        }
    }

    /// Remember accepted license keys in `store`.
    pub fn with_key_store(self, store: Arc<dyn KeyValueStore>) -> Self {
        *self.inner.key_store.write() = Some(store);
        self
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.machine.state()
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Get the underlying transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Subscribe to every session event.
    ///
    /// Transitions, command results and errors are never dropped; see
    /// [`EventReceiver`] for how weight samples are bounded.
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.machine.subscribe()
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Register a callback for state transitions.
    pub fn on_state_changed<F>(&self, mut callback: F) -> CallbackHandle
    where
        F: FnMut(StateChange) + Send + 'static,
    {
        self.register(move |event| {
            if let SessionEvent::StateChanged(change) = event {
                callback(change);
            }
        })
    }

    /// Register a callback for accepted weight samples.
    pub fn on_weight<F>(&self, mut callback: F) -> CallbackHandle
    where
        F: FnMut(WeightSample) + Send + 'static,
    {
        self.register(move |event| {
            if let SessionEvent::Weight(sample) = event {
                callback(sample);
            }
        })
    }

    /// Register a callback for control responses.
    pub fn on_command_result<F>(&self, mut callback: F) -> CallbackHandle
    where
        F: FnMut(ControlOutcome) + Send + 'static,
    {
        self.register(move |event| {
            if let SessionEvent::CommandResult(outcome) = event {
                callback(outcome);
            }
        })
    }

    /// Register a callback for surfaced failures.
    pub fn on_error<F>(&self, mut callback: F) -> CallbackHandle
    where
        F: FnMut(ErrorKind, String) + Send + 'static,
    {
        self.register(move |event| {
            if let SessionEvent::Error { kind, message } = event {
                callback(kind, message);
            }
        })
    }

    fn register<F>(&self, callback: F) -> CallbackHandle
    where
        F: FnMut(SessionEvent) + Send + 'static,
    {
        let id = self.inner.callback_counter.fetch_add(1, Ordering::SeqCst);
        let listener = spawn_listener(self.inner.machine.subscribe(), callback);
        CallbackHandle::new(id, move || listener.abort())
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Scan for scales using the configured scan timeout.
    pub async fn start_scan(&self) -> Result<DeviceScan<T>> {
        self.scan_for_devices(self.inner.config.scan_timeout).await
    }

    /// Scan for scales for up to `timeout`.
    ///
    /// A scan already in progress is stopped and replaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] while connecting or connected, or the
    /// transport error if the radio refuses to scan.
    pub async fn scan_for_devices(&self, timeout: Duration) -> Result<DeviceScan<T>> {
        let (epoch, previous) =
            self.inner
                .machine
                .begin("scan", ConnectionState::can_scan, ConnectionState::Scanning)?;

        if previous == ConnectionState::Scanning {
            debug!("Restarting scan");
            self.inner.stop_transport_scan().await;
        }

        match self.inner.transport.scan(timeout).await {
            Ok(advertisements) => Ok(DeviceScan::new(
                self.inner.clone(),
                epoch,
                advertisements,
                Instant::now() + timeout,
            )),
            Err(e) => {
                error!("Failed to start scan: {}", e);
                self.inner.fail(epoch, &e);
                Err(e)
            }
        }
    }

    /// Stop the active scan, if any.
    pub async fn stop_scan(&self) -> Result<()> {
        let scanning = self.inner.machine.begin(
            "stop scan",
            |state| *state == ConnectionState::Scanning,
            ConnectionState::Scanning,
        );

        if let Ok((epoch, _)) = scanning {
            self.inner.stop_transport_scan().await;
            self.inner.machine.advance(epoch, ConnectionState::Disconnected);
        }

        Ok(())
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Connect to a scale and authenticate with a license key.
    ///
    /// # Errors
    ///
    /// - [`Error::LicenseFormat`] if the key is malformed; the radio is not touched.
    /// - [`Error::State`] if the session is busy or already authenticated.
    /// - [`Error::Authentication`] if the scale rejects the key.
    /// - Transport or timeout errors once retries are exhausted.
    pub async fn connect_with_license_key(&self, peripheral_id: &str, license_key: &str) -> Result<()> {
        self.connect_with_options(peripheral_id, license_key, ConnectOptions::default())
            .await
    }

    /// Like [`connect_with_license_key`](Self::connect_with_license_key) with
    /// per-call timeout and retry overrides.
    pub async fn connect_with_options(
        &self,
        peripheral_id: &str,
        license_key: &str,
        options: ConnectOptions,
    ) -> Result<()> {
        let key = LicenseKey::parse(license_key)?;
        self.connect_with_key(peripheral_id, key, &options).await
    }

    /// Connect using the last license key the scale accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if no key store is configured or nothing
    /// has been cached yet.
    pub async fn connect_with_cached_key(&self, peripheral_id: &str) -> Result<()> {
        let key = self
            .last_license_key()
            .await?
            .ok_or_else(|| Error::Storage("no cached license key".to_string()))?;
        self.connect_with_key(peripheral_id, key, &ConnectOptions::default())
            .await
    }

    async fn connect_with_key(
        &self,
        peripheral_id: &str,
        key: LicenseKey,
        options: &ConnectOptions,
    ) -> Result<()> {
        let config = self.inner.config.merged(options);
        let (epoch, previous) = self.inner.machine.begin(
            "connect",
            ConnectionState::can_connect,
            ConnectionState::Connecting,
        )?;

        info!("Connecting to {}", peripheral_id);

        let mut attempt = AttemptGuard::new(self.inner.clone(), epoch);

        if previous == ConnectionState::Scanning {
            self.inner.stop_transport_scan().await;
        }

        let transport = &self.inner.transport;
        let retry = config.retry_config();

        let connected = with_retry(&retry, "connect", || {
            with_timeout(
                config.connection_timeout,
                "connect",
                transport.connect(peripheral_id, config.connection_timeout),
            )
        })
        .await;

        let link = match connected {
            Ok(link) => link,
            Err(e) => {
                error!("Failed to connect to {}: {}", peripheral_id, e);
                attempt.disarm();
                self.inner.fail(epoch, &e);
                return Err(e);
            }
        };
        attempt.hold(link.clone());

        if !self.inner.machine.advance(epoch, ConnectionState::Connected) {
            attempt.disarm();
            self.inner.release(&link).await;
            return Err(Error::state("connect", self.state()));
        }

        {
            let mut tracker = self.inner.tracker.lock();
            tracker.record_connect(peripheral_id);
            if let Some(&rssi) = self.inner.sightings.read().get(peripheral_id) {
                tracker.record_signal(peripheral_id, rssi);
            }
        }

        if let Err(e) = self
            .authenticate(epoch, peripheral_id, &link, &key, &config)
            .await
        {
            attempt.disarm();
            error!("Authentication with {} failed: {}", peripheral_id, e);
            self.inner.tracker.lock().record_disconnect(peripheral_id);
            self.inner.fail(epoch, &e);
            self.inner.release(&link).await;
            return Err(e);
        }
        attempt.disarm();

        info!("Authenticated with {}", peripheral_id);

        if let Some(store) = self.key_store() {
            if let Err(e) = storage::save_license_key(store.as_ref(), &key).await {
                warn!("Failed to cache license key: {}", e);
            }
        }

        Ok(())
    }

    /// Send the license key and, once accepted, install the link.
    async fn authenticate(
        &self,
        epoch: u64,
        peripheral_id: &str,
        link: &T::Link,
        key: &LicenseKey,
        config: &SessionConfig,
    ) -> Result<()> {
        let transport = &self.inner.transport;
        let timeout = config.command_timeout;

        let control = with_timeout(
            timeout,
            "subscribe control",
            transport.subscribe(link, CONTROL_CHARACTERISTIC_UUID),
        )
        .await?;

        let (response_tx, mut responses) = mpsc::channel(RESPONSE_QUEUE_CAPACITY);
        let mut tasks = TaskSet::default();
        tasks.push(spawn_response_forwarder(control, response_tx));

        let payload = key.to_payload();
        with_retry(&config.retry_config(), "authenticate", || {
            with_timeout(
                timeout,
                "authenticate",
                transport.write(link, CONTROL_CHARACTERISTIC_UUID, &payload, timeout),
            )
        })
        .await?;

        let response = await_response(&mut responses, timeout, "authenticate").await?;
        let outcome = ControlOutcome::from_bytes(&response);
        debug!("Authentication response: {:?}", outcome.code);
        self.inner
            .machine
            .emit(SessionEvent::CommandResult(outcome.clone()));

        if !outcome.code.is_authenticated() {
            return Err(Error::Authentication {
                message: outcome.message,
            });
        }

        let data = with_timeout(
            timeout,
            "subscribe data",
            transport.subscribe(link, DATA_CHARACTERISTIC_UUID),
        )
        .await?;

        let (weight_tx, _) = broadcast::channel(WEIGHT_CHANNEL_CAPACITY);

        let mut slot = self.inner.link.lock();
        if self.inner.machine.epoch() != epoch {
            return Err(Error::state("connect", self.state()));
        }

        tasks.push(tokio::spawn(pump_weights(
            Arc::downgrade(&self.inner),
            epoch,
            data,
            weight_tx.clone(),
            config.data_throttle,
        )));

        if !config.signal_poll_interval.is_zero() {
            tasks.push(tokio::spawn(poll_signal(
                Arc::downgrade(&self.inner),
                link.clone(),
                peripheral_id.to_string(),
                config.signal_poll_interval,
            )));
        }

        *slot = Some(ActiveLink {
            epoch,
            peripheral_id: peripheral_id.to_string(),
            link: link.clone(),
            responses: Arc::new(tokio::sync::Mutex::new(responses)),
            weight_tx,
            tasks,
        });
        self.inner
            .machine
            .advance(epoch, ConnectionState::Authenticated);

        Ok(())
    }

    /// Disconnect from the scale.
    ///
    /// Safe to call in any state, including while a connect is in flight
    /// (the attempt is abandoned). Never fails.
    pub async fn disconnect(&self) -> Result<()> {
        let (epoch, state) = self.inner.machine.supersede();
        let active = self.inner.link.lock().take();

        match active {
            Some(ActiveLink {
                peripheral_id,
                link,
                tasks,
                ..
            }) => {
                info!("Disconnecting from {}", peripheral_id);

                let transport = &self.inner.transport;
                let timeout = self.inner.config.command_timeout;
                let notify = with_timeout(
                    timeout,
                    "disconnect",
                    transport.write(
                        &link,
                        CONTROL_CHARACTERISTIC_UUID,
                        DISCONNECT_COMMAND.as_bytes(),
                        timeout,
                    ),
                )
                .await;
                if let Err(e) = notify {
                    warn!("Scale did not acknowledge disconnect: {}", e);
                }

                drop(tasks);
                self.inner.release(&link).await;
                self.inner.tracker.lock().record_disconnect(&peripheral_id);
            }
            None if state == ConnectionState::Scanning => {
                self.inner.stop_transport_scan().await;
            }
            None => trace!("Disconnect with no active link while {}", state),
        }

        self.inner.machine.advance(epoch, ConnectionState::Disconnected);
        Ok(())
    }

    /// Identifier of the authenticated scale, if any.
    pub fn connected_peripheral(&self) -> Option<String> {
        self.inner
            .link
            .lock()
            .as_ref()
            .map(|active| active.peripheral_id.clone())
    }

    // ========================================================================
    // Commands and data
    // ========================================================================

    /// Sound the scale's buzzer and wait for its acknowledgement.
    ///
    /// A negative acknowledgement is returned as an outcome with
    /// `success == false`. If the write or the wait fails, the link is torn
    /// down and the session moves to the error state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] unless authenticated.
    pub async fn send_buzzer_command(&self, command: BuzzerCommand) -> Result<ControlOutcome> {
        let (epoch, link, responses) = {
            let state = self.state();
            let slot = self.inner.link.lock();
            match slot.as_ref() {
                Some(active) if state.is_authenticated() => (
                    active.epoch,
                    active.link.clone(),
                    active.responses.clone(),
                ),
                _ => return Err(Error::state("send buzzer command", state)),
            }
        };

        let mut queue = responses.lock().await;
        drain_stale(&mut queue);

        debug!("Sending buzzer command {}", command);

        let transport = &self.inner.transport;
        let timeout = self.inner.config.command_timeout;
        let payload = command.to_payload();

        let written = with_retry(&self.inner.config.retry_config(), "buzzer", || {
            with_timeout(
                timeout,
                "buzzer",
                transport.write(&link, BUZZER_CHARACTERISTIC_UUID, &payload, timeout),
            )
        })
        .await;

        let response = match written {
            Ok(()) => await_response(&mut queue, timeout, "buzzer").await,
            Err(e) => Err(e),
        };
        drop(queue);

        match response {
            Ok(raw) => {
                let outcome = ControlOutcome::from_bytes(&raw);
                self.inner
                    .machine
                    .emit(SessionEvent::CommandResult(outcome.clone()));
                Ok(outcome)
            }
            Err(e) => {
                error!("Buzzer command {} failed: {}", command, e);
                self.inner.handle_command_failure(epoch, &e).await;
                Err(e)
            }
        }
    }

    /// Stream of weight samples from the authenticated scale.
    ///
    /// The stream ends when the session leaves the authenticated state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] unless authenticated.
    pub fn weight_stream(&self) -> Result<WeightStream> {
        let state = self.state();
        let slot = self.inner.link.lock();
        match slot.as_ref() {
            Some(active) if state.is_authenticated() => Ok(weight_stream(active.weight_tx.subscribe())),
            _ => Err(Error::state("stream weight", state)),
        }
    }

    // ========================================================================
    // Connection health
    // ========================================================================

    /// Metrics for the authenticated scale.
    pub fn connection_metrics(&self) -> Option<ConnectionMetrics> {
        let id = self.connected_peripheral()?;
        self.metrics_for(&id)
    }

    /// Metrics for any peripheral this session has connected to.
    pub fn metrics_for(&self, peripheral_id: &str) -> Option<ConnectionMetrics> {
        self.inner.tracker.lock().metrics(peripheral_id).cloned()
    }

    /// Whether the link to the authenticated scale looks stable.
    pub fn is_connection_stable(&self) -> bool {
        self.connected_peripheral()
            .map(|id| self.inner.tracker.lock().is_stable(&id))
            .unwrap_or(false)
    }

    /// Read the link RSSI now and record it.
    pub async fn refresh_signal_strength(&self) -> Result<Option<i16>> {
        let (peripheral_id, link) = {
            let state = self.state();
            let slot = self.inner.link.lock();
            match slot.as_ref() {
                Some(active) => (active.peripheral_id.clone(), active.link.clone()),
                None => return Err(Error::state("read signal strength", state)),
            }
        };

        let rssi = self.inner.transport.read_rssi(&link).await?;
        if let Some(rssi) = rssi {
            self.inner.tracker.lock().record_signal(&peripheral_id, rssi);
        }
        Ok(rssi)
    }

    /// Forget metrics for one peripheral.
    pub fn reset_metrics(&self, peripheral_id: &str) {
        self.inner.tracker.lock().reset(peripheral_id);
    }

    /// Forget metrics for every peripheral.
    pub fn clear_metrics(&self) {
        self.inner.tracker.lock().clear_all();
    }

    // ========================================================================
    // License key cache
    // ========================================================================

    fn key_store(&self) -> Option<Arc<dyn KeyValueStore>> {
        self.inner.key_store.read().clone()
    }

    /// The last license key the scale accepted, if a key store is configured.
    pub async fn last_license_key(&self) -> Result<Option<LicenseKey>> {
        match self.key_store() {
            Some(store) => storage::load_license_key(store.as_ref()).await,
            None => Ok(None),
        }
    }

    /// Remove the cached license key.
    pub async fn forget_license_key(&self) -> Result<()> {
        match self.key_store() {
            Some(store) => storage::clear_license_key(store.as_ref()).await,
            None => Ok(()),
        }
    }
}

impl<T: BleTransport> std::fmt::Debug for ScaleSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScaleSession")
            .field("state", &self.state())
            .field("peripheral", &self.connected_peripheral())
            .finish()
    }
}

/// Decode data notifications and publish accepted samples.
async fn pump_weights<T: BleTransport>(
    inner: Weak<Inner<T>>,
    epoch: u64,
    mut data: NotificationStream,
    weight_tx: broadcast::Sender<WeightSample>,
    throttle: Duration,
) {
    let mut last_delivered: Option<Instant> = None;

    while let Some(payload) = data.next().await {
        let sample = match decode_weight(&payload) {
            Ok(sample) => sample,
            Err(reason) => {
                debug!(
                    "Dropping weight payload {:?}: {}",
                    String::from_utf8_lossy(&payload),
                    reason
                );
                continue;
            }
        };

        if !throttle.is_zero() {
            let now = Instant::now();
            if matches!(last_delivered, Some(last) if now.duration_since(last) < throttle) {
                trace!("Throttled weight sample {}", sample);
                continue;
            }
            last_delivered = Some(now);
        }

        let Some(session) = inner.upgrade() else {
            return;
        };
        session.machine.emit(SessionEvent::Weight(sample.clone()));
        let _ = weight_tx.send(sample);
    }

    debug!("Weight notifications ended");
    if let Some(session) = inner.upgrade() {
        session.handle_link_loss(epoch);
    }
}

/// Periodically sample link RSSI into the stability tracker.
async fn poll_signal<T: BleTransport>(
    inner: Weak<Inner<T>>,
    link: T::Link,
    peripheral_id: String,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let Some(session) = inner.upgrade() else {
            return;
        };

        match session.transport.read_rssi(&link).await {
            Ok(Some(rssi)) => {
                trace!("RSSI for {}: {}", peripheral_id, rssi);
                session.tracker.lock().record_signal(&peripheral_id, rssi);
            }
            Ok(None) => {}
            Err(e) => debug!("Failed to read RSSI for {}: {}", peripheral_id, e),
        }
    }
}
