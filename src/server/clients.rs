//! Set of connected clients.
//!
//! Mutated by the hub on connect and disconnect, read by the broadcaster.
//! The lock is only held to copy handles out; sends happen on the copy.
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │  ClientSet                            │
//! │  ConnectionId(a) → ConnectionHandle   │
//! │  ConnectionId(b) → ConnectionHandle   │
//! └───────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use futures_util::future::join_all;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::identifiers::ConnectionId;
use crate::protocol::Message;
use crate::transport::ConnectionHandle;

// ============================================================================
// BroadcastReport
// ============================================================================

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients the message was written to.
    pub delivered: usize,
    /// Clients the send failed for.
    pub failed: usize,
}

impl BroadcastReport {
    /// Number of clients targeted.
    #[inline]
    #[must_use]
    pub fn total(&self) -> usize {
        self.delivered + self.failed
    }
}

// ============================================================================
// ClientSet
// ============================================================================

/// Concurrency-safe map of connected clients.
#[derive(Debug, Default)]
pub struct ClientSet {
    clients: RwLock<FxHashMap<ConnectionId, ConnectionHandle>>,
}

impl ClientSet {
    /// Creates an empty set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a client. Replaces any handle with the same ID.
    pub fn insert(&self, handle: ConnectionHandle) {
        let id = handle.id();
        self.clients.write().insert(id, handle);
        debug!(connection_id = %id, "Client added");
    }

    /// Removes a client. Returns `true` if it was present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.clients.write().remove(&id).is_some();
        if removed {
            debug!(connection_id = %id, "Client removed");
        }
        removed
    }

    /// Returns `true` if `id` is connected.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.clients.read().contains_key(&id)
    }

    /// Number of clients.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Returns `true` if no client is connected.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// IDs of connected clients.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.clients.read().keys().copied().collect()
    }

    /// Copies out the handles of clients whose transport is still open.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.clients
            .read()
            .values()
            .filter(|handle| !handle.is_closed())
            .cloned()
            .collect()
    }

    /// Drops entries whose transport has closed. Returns how many.
    pub fn prune_closed(&self) -> usize {
        let mut clients = self.clients.write();
        let before = clients.len();
        clients.retain(|_, handle| !handle.is_closed());
        before - clients.len()
    }

    /// Closes every client's transport.
    pub fn close_all(&self) {
        for handle in self.snapshot() {
            handle.close();
        }
    }

    /// Sends `message` to every connected client concurrently.
    pub async fn send_all(&self, message: &Message) -> BroadcastReport {
        fan_out(self.snapshot(), message).await
    }

    /// Sends `message` to the listed clients that are connected.
    ///
    /// IDs that are not connected count as failures.
    pub async fn send_to(&self, ids: &[ConnectionId], message: &Message) -> BroadcastReport {
        let targets: Vec<_> = {
            let clients = self.clients.read();
            ids.iter().map(|id| (*id, clients.get(id).cloned())).collect()
        };

        let mut missing = 0;
        let handles: Vec<_> = targets
            .into_iter()
            .filter_map(|(id, handle)| {
                if handle.is_none() {
                    warn!(connection_id = %id, "Target client not connected");
                    missing += 1;
                }
                handle
            })
            .collect();

        let mut report = fan_out(handles, message).await;
        report.failed += missing;
        report
    }
}

/// Sends to each handle concurrently; one failure never blocks the rest.
async fn fan_out(handles: Vec<ConnectionHandle>, message: &Message) -> BroadcastReport {
    if handles.is_empty() {
        return BroadcastReport::default();
    }

    let sends = handles.into_iter().map(|handle| {
        let message = message.clone();
        async move {
            let id = handle.id();
            let result = handle.send(message).await;
            if let Err(e) = &result {
                warn!(connection_id = %id, error = %e, "Push to client failed");
            }
            result.is_ok()
        }
    });

    let results = join_all(sends).await;
    let delivered = results.iter().filter(|ok| **ok).count();

    BroadcastReport {
        delivered,
        failed: results.len() - delivered,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::{TransportEvent, pair};

    #[tokio::test]
    async fn test_send_all_reaches_every_client() {
        let set = ClientSet::new();
        let (a_local, mut a_remote) = pair();
        let (b_local, mut b_remote) = pair();
        set.insert(a_local.handle());
        set.insert(b_local.handle());

        let message = Message::receive_message("hello");
        let report = set.send_all(&message).await;

        assert_eq!(report, BroadcastReport { delivered: 2, failed: 0 });
        assert_eq!(a_remote.recv().await, TransportEvent::Message(message.clone()));
        assert_eq!(b_remote.recv().await, TransportEvent::Message(message));
    }

    #[tokio::test]
    async fn test_empty_set_is_noop() {
        let set = ClientSet::new();
        let report = set.send_all(&Message::receive_message("nobody")).await;
        assert_eq!(report.total(), 0);
    }

    #[tokio::test]
    async fn test_closed_client_does_not_block_others() {
        let set = ClientSet::new();
        let (dead_local, mut dead_remote) = pair();
        let (live_local, mut live_remote) = pair();
        set.insert(dead_local.handle());
        set.insert(live_local.handle());

        // Closed transports are skipped
        dead_remote.close();
        let _ = dead_remote.recv().await;
        dead_local.handle().closed().await;

        let report = set.send_all(&Message::receive_message("still here")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(
            live_remote.recv().await,
            TransportEvent::Message(Message::receive_message("still here"))
        );

        assert_eq!(set.prune_closed(), 1);
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_send_to_subset() {
        let set = ClientSet::new();
        let (a_local, mut a_remote) = pair();
        let (b_local, _b_remote) = pair();
        set.insert(a_local.handle());
        set.insert(b_local.handle());

        let absent = ConnectionId::generate();
        let report = set
            .send_to(&[a_local.id(), absent], &Message::receive_message("just you"))
            .await;

        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(
            a_remote.recv().await,
            TransportEvent::Message(Message::receive_message("just you"))
        );
    }

    #[tokio::test]
    async fn test_insert_remove() {
        let set = ClientSet::new();
        let (local, _remote) = pair();
        set.insert(local.handle());

        assert!(set.contains(local.id()));
        assert_eq!(set.ids(), vec![local.id()]);
        assert!(set.remove(local.id()));
        assert!(!set.remove(local.id()));
        assert!(set.is_empty());
    }
}
