//! Connection health heuristics.
//!
//! [`ConnectionStabilityTracker`] keeps rolling metrics per peripheral and
//! decides whether a link looks stable: up for more than five seconds,
//! average RSSI above -80 dBm and fewer than three disconnections.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Number of signal samples kept per peripheral.
pub const SIGNAL_WINDOW: usize = 10;

/// Minimum uptime before a link is considered stable.
pub const STABLE_UPTIME: Duration = Duration::from_secs(5);

/// Average RSSI must be strictly above this value (dBm).
pub const MIN_STABLE_RSSI: f64 = -80.0;

/// A link with this many disconnections or more is unstable.
pub const MAX_STABLE_DISCONNECTIONS: u32 = 3;

/// Rolling metrics for one peripheral.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionMetrics {
    /// When the current (or last) connection started.
    pub connected_since: Instant,
    /// Number of recorded disconnections.
    pub disconnection_count: u32,
    /// When the last disconnection happened.
    pub last_disconnection: Option<Instant>,
    signal_samples: VecDeque<i16>,
    average_signal: Option<f64>,
}

impl ConnectionMetrics {
    fn new(now: Instant) -> Self {
        Self {
            connected_since: now,
            disconnection_count: 0,
            last_disconnection: None,
            signal_samples: VecDeque::with_capacity(SIGNAL_WINDOW),
            average_signal: None,
        }
    }

    /// The most recent signal readings, oldest first.
    pub fn signal_samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.signal_samples.iter().copied()
    }

    /// Mean of the retained signal samples, if any.
    pub fn average_signal(&self) -> Option<f64> {
        self.average_signal
    }

    /// Time since `connected_since`.
    pub fn uptime(&self) -> Duration {
        self.connected_since.elapsed()
    }

    fn push_signal(&mut self, rssi: i16) {
        if self.signal_samples.len() == SIGNAL_WINDOW {
            self.signal_samples.pop_front();
        }
        self.signal_samples.push_back(rssi);

        let sum: f64 = self.signal_samples.iter().map(|&s| s as f64).sum();
        self.average_signal = Some(sum / self.signal_samples.len() as f64);
    }

    fn is_stable(&self) -> bool {
        self.uptime() > STABLE_UPTIME
            && self
                .average_signal
                .map(|avg| avg > MIN_STABLE_RSSI)
                .unwrap_or(true)
            && self.disconnection_count < MAX_STABLE_DISCONNECTIONS
    }
}

/// Per-peripheral connection health tracker.
#[derive(Debug, Default)]
pub struct ConnectionStabilityTracker {
    metrics: HashMap<String, ConnectionMetrics>,
}

impl ConnectionStabilityTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful connection, restarting the uptime clock.
    pub fn record_connect(&mut self, id: &str) {
        let now = Instant::now();
        self.metrics
            .entry(id.to_string())
            .and_modify(|m| m.connected_since = now)
            .or_insert_with(|| ConnectionMetrics::new(now));
        trace!("Recorded connect for {}", id);
    }

    /// Record a disconnection. Unknown ids are ignored.
    pub fn record_disconnect(&mut self, id: &str) {
        if let Some(metrics) = self.metrics.get_mut(id) {
            metrics.disconnection_count += 1;
            metrics.last_disconnection = Some(Instant::now());
            trace!(
                "Recorded disconnect for {} (total {})",
                id,
                metrics.disconnection_count
            );
        }
    }

    /// Record a signal strength reading. Unknown ids are ignored.
    pub fn record_signal(&mut self, id: &str, rssi: i16) {
        if let Some(metrics) = self.metrics.get_mut(id) {
            metrics.push_signal(rssi);
        }
    }

    /// Check whether the link to `id` looks stable.
    pub fn is_stable(&self, id: &str) -> bool {
        self.metrics.get(id).map(|m| m.is_stable()).unwrap_or(false)
    }

    /// Metrics for `id`, if it has ever connected.
    pub fn metrics(&self, id: &str) -> Option<&ConnectionMetrics> {
        self.metrics.get(id)
    }

    /// Average RSSI for `id`.
    pub fn average_rssi(&self, id: &str) -> Option<f64> {
        self.metrics.get(id).and_then(|m| m.average_signal)
    }

    /// Forget everything about `id`.
    pub fn reset(&mut self, id: &str) {
        self.metrics.remove(id);
    }

    /// Forget all peripherals.
    pub fn clear_all(&mut self) {
        self.metrics.clear();
    }

    /// Number of tracked peripherals.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether no peripherals are tracked.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
