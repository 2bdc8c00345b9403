use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::cluster::Broker;

/// Lifecycle of a [`ManagedConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unopened,
    Opening,
    Open,
    /// The last open attempt failed. The next [`ManagedConnection::ensure_open`] tries again.
    Failed,
}

/// A broker handle plus whether it was opened through this handle.
///
/// Opens are serialised, so concurrent callers of [`ensure_open`](Self::ensure_open) trigger a single
/// [`Broker::open`]. Once open, further calls perform no I/O.
pub struct ManagedConnection<B> {
    broker: Arc<B>,
    state: Mutex<ConnectionState>,
    gate: AsyncMutex<()>,
}

impl<B> ManagedConnection<B>
where
    B: Broker,
{
    pub fn new(broker: Arc<B>) -> Self {
        Self {
            broker,
            state: Mutex::new(ConnectionState::Unopened),
            gate: AsyncMutex::new(()),
        }
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    pub fn broker_id(&self) -> i32 {
        self.broker.id()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub async fn ensure_open(&self) -> Result<(), B::Error> {
        if self.state() == ConnectionState::Open {
            return Ok(());
        }

        let _gate = self.gate.lock().await;
        if self.state() == ConnectionState::Open {
            return Ok(());
        }

        *self.state.lock() = ConnectionState::Opening;
        let res = self.broker.open().await;
        *self.state.lock() = match res {
            Ok(()) => ConnectionState::Open,
            Err(_) => ConnectionState::Failed,
        };
        res
    }
}

impl<B> std::fmt::Debug for ManagedConnection<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}
