//! Per-connection resources owned by an authenticated session.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::protocol::WeightSample;
use crate::retry::with_timeout;

/// Capacity of the per-link weight channel.
pub(crate) const WEIGHT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the control response queue.
pub(crate) const RESPONSE_QUEUE_CAPACITY: usize = 8;

/// Infinite stream of accepted weight samples.
///
/// Ends when the session leaves the authenticated state.
pub type WeightStream = BoxStream<'static, WeightSample>;

/// Background tasks aborted together when dropped.
#[derive(Default)]
pub(crate) struct TaskSet(Vec<JoinHandle<()>>);

impl TaskSet {
    pub(crate) fn push(&mut self, handle: JoinHandle<()>) {
        self.0.push(handle);
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Queue of raw control responses, locked for the duration of one command.
pub(crate) type ResponseQueue = Arc<Mutex<mpsc::Receiver<Bytes>>>;

/// Resources of an authenticated link.
pub(crate) struct ActiveLink<L> {
    pub(crate) epoch: u64,
    pub(crate) peripheral_id: String,
    pub(crate) link: L,
    pub(crate) responses: ResponseQueue,
    pub(crate) weight_tx: broadcast::Sender<WeightSample>,
    pub(crate) tasks: TaskSet,
}

/// Forward control notifications into a bounded queue.
pub(crate) fn spawn_response_forwarder(
    mut notifications: BoxStream<'static, Bytes>,
    tx: mpsc::Sender<Bytes>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(response) = notifications.next().await {
            trace!("Control response: {:?}", String::from_utf8_lossy(&response));
            if tx.send(response).await.is_err() {
                break;
            }
        }
        trace!("Control response stream ended");
    })
}

/// Discard responses that arrived while no command was outstanding.
pub(crate) fn drain_stale(rx: &mut mpsc::Receiver<Bytes>) {
    while let Ok(stale) = rx.try_recv() {
        warn!(
            "Dropping unsolicited control response: {:?}",
            String::from_utf8_lossy(&stale)
        );
    }
}

/// Wait for the next control response.
pub(crate) async fn await_response(
    rx: &mut mpsc::Receiver<Bytes>,
    timeout: Duration,
    operation: &str,
) -> Result<Bytes> {
    with_timeout(timeout, operation, async {
        rx.recv()
            .await
            .ok_or_else(|| Error::transport("control channel closed"))
    })
    .await
}

/// Adapt a weight broadcast receiver into a [`WeightStream`].
pub(crate) fn weight_stream(rx: broadcast::Receiver<WeightSample>) -> WeightStream {
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(sample) => return Some((sample, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Weight stream fell behind, skipped {} samples", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}
