//! Connection registry: who is online, and how to reach them.
//!
//! The registry is the only owner of the identifier → handle mapping. All
//! mutation goes through a single write lock; snapshots and routing lookups
//! take the read side and never observe a half-applied insert or remove.

use crate::error::{DeliveryError, RegistryError};
use fileshare_types::{ConnectionId, ServerMessage};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Registered connections keyed by identifier.
pub type Members = HashMap<ConnectionId, PeerHandle>;

/// Handle to one live connection.
///
/// Cloning is cheap. Messages go onto the connection's bounded outbound
/// queue, which a single writer task drains into the socket, so writes to
/// one transport never interleave.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<ServerMessage>,
    disconnect: CancellationToken,
}

impl PeerHandle {
    /// Create a handle and the receiving end of its outbound queue.
    pub fn channel(
        id: ConnectionId,
        capacity: usize,
        disconnect: CancellationToken,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id,
                outbound,
                disconnect,
            },
            rx,
        )
    }

    /// Identifier bound to this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueue a message without waiting.
    ///
    /// A full queue means the peer has stopped draining its transport, so
    /// the peer's own disconnect is triggered before reporting the failure.
    pub fn deliver(&self, message: ServerMessage) -> Result<(), DeliveryError> {
        match self.outbound.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    "Outbound queue full for {}, dropping {} and disconnecting",
                    self.id,
                    dropped.kind()
                );
                self.disconnect.cancel();
                Err(DeliveryError::Congested)
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Ask this connection's session to shut down.
    pub fn force_disconnect(&self) {
        self.disconnect.cancel();
    }

    /// Whether a disconnect has been requested for this connection.
    pub fn is_disconnecting(&self) -> bool {
        self.disconnect.is_cancelled()
    }
}

/// Map of currently registered connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    members: RwLock<Members>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    pub async fn register(&self, handle: PeerHandle) -> Result<(), RegistryError> {
        self.register_with(handle, |_, _| ()).await
    }

    /// Register a connection and run `on_join` atomically with the insert.
    ///
    /// `on_join` sees the newcomer and the members present *before* it was
    /// inserted, while the write lock is held.
    pub async fn register_with<R>(
        &self,
        handle: PeerHandle,
        on_join: impl FnOnce(&PeerHandle, &Members) -> R,
    ) -> Result<R, RegistryError> {
        let mut members = self.members.write().await;
        let id = handle.id();
        if members.contains_key(&id) {
            return Err(RegistryError::DuplicateIdentifier { id });
        }

        let outcome = on_join(&handle, &members);
        members.insert(id, handle);

        tracing::debug!("Registered connection {} (total: {})", id, members.len());
        Ok(outcome)
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub async fn unregister(&self, id: &ConnectionId) -> bool {
        self.unregister_with(id, |_| ()).await.is_some()
    }

    /// Remove a connection and run `on_leave` atomically with the removal.
    ///
    /// `on_leave` sees the remaining members. It does not run at all if the
    /// identifier was already absent, so racing closes produce one call.
    pub async fn unregister_with<R>(
        &self,
        id: &ConnectionId,
        on_leave: impl FnOnce(&Members) -> R,
    ) -> Option<R> {
        let mut members = self.members.write().await;
        members.remove(id)?;

        tracing::debug!("Unregistered connection {} (remaining: {})", id, members.len());
        Some(on_leave(&members))
    }

    /// Resolve an identifier to its current handle.
    pub async fn lookup(&self, id: &ConnectionId) -> Option<PeerHandle> {
        self.members.read().await.get(id).cloned()
    }

    /// Point-in-time set of registered identifiers.
    pub async fn snapshot(&self) -> BTreeSet<ConnectionId> {
        self.members.read().await.keys().copied().collect()
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    /// Whether no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Best-effort count that never waits on the lock (health endpoint).
    pub fn try_len(&self) -> Option<usize> {
        self.members.try_read().ok().map(|m| m.len())
    }
}
