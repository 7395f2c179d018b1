//! Session events and subscription handles.
//!
//! Every state transition, accepted weight sample, command result and
//! surfaced failure is delivered to each subscriber through its own queue,
//! in the order the session produced them. Transitions, command results
//! and errors are never dropped. A subscriber that falls more than
//! [`WEIGHT_BACKLOG`] samples behind misses the newest weight samples
//! until it catches up.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::ble::connection::StateChange;
use crate::error::{Error, ErrorKind};
use crate::protocol::{ControlOutcome, WeightSample};

/// Undelivered weight samples a subscriber may hold before new ones are skipped.
pub const WEIGHT_BACKLOG: usize = 256;

/// Something that happened in a [`ScaleSession`](crate::ScaleSession).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionEvent {
    /// The connection state changed.
    StateChanged(StateChange),
    /// A weight sample was accepted.
    Weight(WeightSample),
    /// The scale answered a command.
    CommandResult(ControlOutcome),
    /// An operation failed and the session moved to the error state.
    Error {
        /// Classification of the failure.
        kind: ErrorKind,
        /// Human readable description.
        message: String,
    },
}

impl SessionEvent {
    /// Build an error event from an [`Error`].
    pub fn from_error(error: &Error) -> Self {
        Self::Error {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Callback handle for unregistering callbacks.
///
/// Dropping the handle unregisters the callback.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}

struct Subscriber {
    tx: mpsc::UnboundedSender<SessionEvent>,
    pending_weights: Arc<AtomicUsize>,
}

/// Fan-out of session events to every live subscriber.
#[derive(Default)]
pub(crate) struct EventHub {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending_weights = Arc::new(AtomicUsize::new(0));

        self.subscribers.lock().push(Subscriber {
            tx,
            pending_weights: pending_weights.clone(),
        });

        EventReceiver {
            rx,
            pending_weights,
        }
    }

    /// Deliver `event` to every subscriber, dropping those that went away.
    pub(crate) fn publish(&self, event: SessionEvent) {
        let is_weight = matches!(event, SessionEvent::Weight(_));

        self.subscribers.lock().retain(|subscriber| {
            if is_weight {
                if subscriber.pending_weights.load(Ordering::SeqCst) >= WEIGHT_BACKLOG {
                    trace!("Subscriber is behind, skipping weight sample");
                    return !subscriber.tx.is_closed();
                }
                subscriber.pending_weights.fetch_add(1, Ordering::SeqCst);
            }
            subscriber.tx.send(event.clone()).is_ok()
        })
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Receiving side of a session event subscription.
///
/// Also usable as a [`Stream`]. The subscription ends when the session is
/// dropped.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    pending_weights: Arc<AtomicUsize>,
}

impl EventReceiver {
    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        let event = self.rx.recv().await?;
        self.mark_delivered(&event);
        Some(event)
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Result<SessionEvent, mpsc::error::TryRecvError> {
        let event = self.rx.try_recv()?;
        self.mark_delivered(&event);
        Ok(event)
    }

    fn mark_delivered(&self, event: &SessionEvent) {
        if let SessionEvent::Weight(_) = event {
            self.pending_weights.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Stream for EventReceiver {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(Some(event)) = &polled {
            self.mark_delivered(event);
        }
        polled
    }
}

/// Deliver events from `rx` to `callback` until the session goes away.
pub(crate) fn spawn_listener<F>(mut rx: EventReceiver, mut callback: F) -> JoinHandle<()>
where
    F: FnMut(SessionEvent) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            callback(event);
        }
    })
}
