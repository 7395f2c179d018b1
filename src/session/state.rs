//! Connection state cell.
//!
//! Holds the current [`ConnectionState`] together with an epoch counter.
//! Every operation that takes ownership of the session (a scan, a connect
//! attempt, a disconnect) bumps the epoch; background work only applies a
//! transition while its epoch is still current. Transitions and their
//! events are published under the same lock so observers never see them
//! out of order.

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;

use crate::ble::connection::{ConnectionState, StateChange};
use crate::error::{Error, Result};
use crate::events::{EventHub, EventReceiver, SessionEvent};

struct Cell {
    state: ConnectionState,
    epoch: u64,
}

pub(crate) struct StateMachine {
    cell: RwLock<Cell>,
    events: EventHub,
    epoch_tx: watch::Sender<u64>,
}

impl StateMachine {
    pub(crate) fn new() -> Self {
        let (epoch_tx, _) = watch::channel(0);

        Self {
            cell: RwLock::new(Cell {
                state: ConnectionState::Disconnected,
                epoch: 0,
            }),
            events: EventHub::new(),
            epoch_tx,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.cell.read().state.clone()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.cell.read().epoch
    }

    pub(crate) fn watch_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_tx.subscribe()
    }

    pub(crate) fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        self.events.publish(event);
    }

    pub(crate) fn emit_error(&self, error: &Error) {
        self.emit(SessionEvent::from_error(error));
    }

    /// Take ownership of the session if the current state allows `operation`.
    ///
    /// Returns the new epoch and the state that was replaced.
    pub(crate) fn begin(
        &self,
        operation: &str,
        allowed: fn(&ConnectionState) -> bool,
        next: ConnectionState,
    ) -> Result<(u64, ConnectionState)> {
        let mut cell = self.cell.write();

        if !allowed(&cell.state) {
            return Err(Error::state(operation, cell.state.clone()));
        }

        let previous = cell.state.clone();
        self.bump(&mut cell);
        self.apply(&mut cell, next);

        Ok((cell.epoch, previous))
    }

    /// Move to `next` if `epoch` still owns the session.
    pub(crate) fn advance(&self, epoch: u64, next: ConnectionState) -> bool {
        let mut cell = self.cell.write();

        if cell.epoch != epoch {
            debug!(
                "Ignoring transition to {} from stale epoch {} (current {})",
                next, epoch, cell.epoch
            );
            return false;
        }

        self.apply(&mut cell, next);
        true
    }

    /// Invalidate whoever owns the session without changing state.
    ///
    /// Returns the new epoch and the current state.
    pub(crate) fn supersede(&self) -> (u64, ConnectionState) {
        let mut cell = self.cell.write();
        self.bump(&mut cell);
        (cell.epoch, cell.state.clone())
    }

    fn bump(&self, cell: &mut Cell) {
        cell.epoch += 1;
        self.epoch_tx.send_replace(cell.epoch);
    }

    fn apply(&self, cell: &mut Cell, next: ConnectionState) {
        if cell.state == next {
            return;
        }

        let previous = std::mem::replace(&mut cell.state, next.clone());
        debug!("Connection state changed: {} -> {}", previous, next);

        self.events.publish(SessionEvent::StateChanged(StateChange {
            previous,
            current: next,
        }));
    }
}
