//! Call registry - correlates responses with waiting callers.
//!
//! Every in-flight call owns a one-shot slot keyed by its correlation ID.
//! The read loop resolves a slot by removing it from the map under the lock
//! and then handing the response over; removal and lookup happen in one
//! critical section, so a slot can be delivered into at most once.
//!
//! The lock only ever covers map access. Callers wait on their slot with the
//! lock released.
//!
//! ```text
//! Connection::call ──register──► ┌──────────────────────┐
//!                                │ id -> oneshot::Sender│ ◄──resolve── read loop
//! PendingGuard::drop ──cancel──► └──────────────────────┘
//!                                        ▲
//!                     Connection::close ─┘ close (drops every sender)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Result, RpcError};

/// Receiving side of a registered call.
#[derive(Debug)]
pub struct PendingCall<R> {
    id: u64,
    rx: oneshot::Receiver<R>,
}

impl<R> PendingCall<R> {
    /// Correlation ID this call waits on.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the response.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::ConnectionClosed`] if the slot is dropped without
    /// a delivery, which happens when the registry is closed.
    pub async fn wait(self) -> Result<R> {
        self.rx.await.map_err(|_| RpcError::ConnectionClosed)
    }
}

struct State<R> {
    calls: HashMap<u64, oneshot::Sender<R>>,
    next_id: u64,
    closed: bool,
}

/// Concurrency-safe map from correlation ID to pending call.
pub struct CallRegistry<R> {
    state: Mutex<State<R>>,
}

impl<R> CallRegistry<R> {
    /// Create an empty, open registry.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                calls: HashMap::new(),
                next_id: 1,
                closed: false,
            }),
        }
    }

    /// Register a call under a caller-chosen ID.
    ///
    /// # Errors
    ///
    /// - [`RpcError::DuplicateId`] if `id` is already in flight
    /// - [`RpcError::ConnectionClosed`] if the registry has been closed
    pub fn register(&self, id: u64) -> Result<PendingCall<R>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RpcError::ConnectionClosed);
        }
        if state.calls.contains_key(&id) {
            return Err(RpcError::DuplicateId(id));
        }

        let (tx, rx) = oneshot::channel();
        state.calls.insert(id, tx);
        Ok(PendingCall { id, rx })
    }

    /// Register a call under the next free ID from the internal counter.
    ///
    /// IDs are nonzero and increase monotonically, skipping any that a
    /// caller registered explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::ConnectionClosed`] if the registry has been closed.
    pub fn register_next(&self) -> Result<PendingCall<R>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RpcError::ConnectionClosed);
        }

        let mut id = state.next_id;
        while id == 0 || state.calls.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        state.next_id = id.wrapping_add(1);

        let (tx, rx) = oneshot::channel();
        state.calls.insert(id, tx);
        Ok(PendingCall { id, rx })
    }

    /// Deliver `response` to the call registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::UnroutableResponse`] when no live call matches,
    /// either because it was never registered, was already resolved or
    /// cancelled, or because its caller stopped waiting.
    pub fn resolve(&self, id: u64, response: R) -> Result<()> {
        let tx = self.state.lock().calls.remove(&id);
        match tx {
            Some(tx) => tx.send(response).map_err(|_| RpcError::UnroutableResponse(id)),
            None => Err(RpcError::UnroutableResponse(id)),
        }
    }

    /// Remove a call without delivering anything. Returns whether an entry
    /// was removed.
    pub fn cancel(&self, id: u64) -> bool {
        self.state.lock().calls.remove(&id).is_some()
    }

    /// Close the registry: refuse new registrations and drop every pending
    /// slot so their waiters observe [`RpcError::ConnectionClosed`].
    ///
    /// Returns how many calls were still pending. Closing twice is a no-op.
    pub fn close(&self) -> usize {
        let dropped = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.calls)
        };
        dropped.len()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of calls currently waiting for a response.
    pub fn len(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Whether no call is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// IDs of the calls currently waiting, sorted (for diagnostics).
    pub fn pending_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.state.lock().calls.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl<R> Default for CallRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels a registry entry when dropped, unless disarmed.
///
/// Held by a call for as long as it might still receive a response. If the
/// call errors out, times out, or its future is dropped, the entry goes away
/// and a late response becomes unroutable instead of lingering in the map.
pub struct PendingGuard<R> {
    registry: Arc<CallRegistry<R>>,
    id: u64,
    armed: bool,
}

impl<R> PendingGuard<R> {
    /// Guard the entry registered under `id`.
    pub fn new(registry: Arc<CallRegistry<R>>, id: u64) -> Self {
        Self {
            registry,
            id,
            armed: true,
        }
    }

    /// Don't cancel on drop. Use once the entry has been resolved.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<R> Drop for PendingGuard<R> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.cancel(self.id);
        }
    }
}
