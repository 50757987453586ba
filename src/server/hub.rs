//! Hub: the server-side host of client sessions.
//!
//! # Architecture
//!
//! ```text
//! WebSocketListener ──accept──► handshake ──► ClientSet.insert
//!                                   │
//!                                   ▼
//!                         ConnectionSession (one per client)
//!                                   │ closed
//!                                   ▼
//!                           ClientSet.remove
//! ```
//!
//! Clients are registered before the handshake is acknowledged, so a
//! client that considers itself connected is always reachable by a
//! broadcast. Messages a client sends (`ReceiveResult`) are dispatched
//! through the hub's own registry.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::identifiers::ConnectionId;
use crate::registry::MessageRegistry;
use crate::session::{ConnectionSession, DEFAULT_DRAIN_TIMEOUT, EpochClock};
use crate::transport::{Connection, WebSocketListener};

use super::clients::ClientSet;

// ============================================================================
// Constants
// ============================================================================

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Bound on waiting for client sessions during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Hub
// ============================================================================

/// Accepts clients and runs a session for each.
///
/// Cheap to clone; clones share the same clients and registry.
#[derive(Clone)]
pub struct Hub {
    registry: Arc<MessageRegistry>,
    clients: Arc<ClientSet>,
    sessions: Arc<Mutex<FxHashMap<ConnectionId, JoinHandle<()>>>>,
    shutdown: CancellationToken,
    drain_timeout: Duration,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("clients", &self.clients.len())
            .field("handlers", &self.registry.names())
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl Hub {
    /// Creates a hub dispatching client messages through `registry`.
    #[must_use]
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self {
            registry,
            clients: Arc::new(ClientSet::new()),
            sessions: Arc::new(Mutex::new(FxHashMap::default())),
            shutdown: CancellationToken::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Ties the hub to an external cancellation signal.
    #[must_use]
    pub fn with_shutdown_token(mut self, token: &CancellationToken) -> Self {
        self.shutdown = token.child_token();
        self
    }

    /// Sets the bound on draining a client's handlers when it closes.
    #[inline]
    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Connected clients.
    #[inline]
    #[must_use]
    pub fn clients(&self) -> &Arc<ClientSet> {
        &self.clients
    }

    /// Registry for client→server messages.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    /// Token cancelled when the hub shuts down.
    #[inline]
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Registers `connection` and runs its session in the background.
    ///
    /// The client is removed from the set once its transport closes. After
    /// [`shutdown`](Self::shutdown) the connection is closed instead.
    pub fn attach(&self, connection: Connection) {
        let connection_id = connection.id();

        // Held across spawn so the task cannot deregister before it is registered.
        // Shutdown cancels before draining, so the check below cannot miss it.
        let mut running = self.sessions.lock();

        if self.shutdown.is_cancelled() {
            debug!(%connection_id, "Hub shut down, closing late client");
            self.clients.remove(connection_id);
            connection.close();
            return;
        }

        self.clients.insert(connection.handle());

        // Every hub-side connection is a single epoch
        let clock = EpochClock::new();
        clock.advance();

        let session = ConnectionSession::new(
            connection,
            Arc::clone(&self.registry),
            clock,
            self.shutdown.child_token(),
        )
        .with_drain_timeout(self.drain_timeout);

        let clients = Arc::clone(&self.clients);
        let sessions = Arc::clone(&self.sessions);

        let task = tokio::spawn(async move {
            let reason = session.run().await;

            clients.remove(connection_id);
            sessions.lock().remove(&connection_id);

            info!(%connection_id, %reason, remaining = clients.len(), "Client disconnected");
        });
        running.insert(connection_id, task);
    }

    /// Accepts clients on `listener` until the hub shuts down.
    ///
    /// A failed accept or handshake is logged and never stops the loop.
    pub async fn serve(&self, listener: WebSocketListener) {
        let listener = Arc::new(listener);
        info!(url = %listener.ws_url(), "Hub listening");

        loop {
            let accepted = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };

            let hub = self.clone();
            let listener = Arc::clone(&listener);

            tokio::spawn(async move {
                let clients = Arc::clone(&hub.clients);
                let handshake = listener.handshake(stream, addr, |handle| {
                    clients.insert(handle.clone());
                });

                match handshake.await {
                    Ok(connection) => hub.attach(connection),
                    Err(e) => {
                        warn!(%addr, error = %e, "Client handshake failed");
                        hub.clients.prune_closed();
                    }
                }
            });
        }

        debug!("Hub accept loop stopped");
    }

    /// Closes every client and waits (bounded) for their sessions to end.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.clients.close_all();

        let tasks: Vec<_> = self.sessions.lock().drain().map(|(_, task)| task).collect();
        let count = tasks.len();

        if timeout(SHUTDOWN_TIMEOUT, join_all(tasks)).await.is_err() {
            warn!(sessions = count, "Client sessions did not finish in time");
        }

        info!(sessions = count, "Hub stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use tokio::sync::mpsc;

    use crate::client::{ConnectionManager, ReconnectPolicy, SessionState};
    use crate::config::ClientOptions;
    use crate::error::Error;
    use crate::protocol::{Message, RECEIVE_MESSAGE, RECEIVE_RESULT};
    use crate::transport::{MemoryConnector, TransportEvent, WebSocketConnector, pair};

    fn localhost() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    fn upper_client_registry() -> Arc<MessageRegistry> {
        let registry = MessageRegistry::new();
        registry.on(RECEIVE_MESSAGE, |message: String, _ctx| async move {
            Ok::<_, Error>(message.to_uppercase())
        });
        Arc::new(registry)
    }

    fn result_collector() -> (Arc<MessageRegistry>, mpsc::UnboundedReceiver<String>) {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let registry = MessageRegistry::new();
        registry.on_notification(RECEIVE_RESULT, move |result: String, _ctx| {
            let _ = results_tx.send(result);
            async { Ok(()) }
        });
        (Arc::new(registry), results_rx)
    }

    #[tokio::test]
    async fn test_attach_tracks_and_removes_client() {
        let hub = Hub::new(Arc::new(MessageRegistry::new()));
        let (local, remote) = pair();
        let id = local.id();

        hub.attach(local);
        assert!(hub.clients().contains(id));

        remote.close();
        for _ in 0..100 {
            if !hub.clients().contains(id) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!hub.clients().contains(id));
    }

    #[tokio::test]
    async fn test_client_results_reach_hub_registry() {
        let (registry, mut results) = result_collector();
        let hub = Hub::new(registry);

        let (local, remote) = pair();
        hub.attach(local);

        remote
            .send(Message::receive_result("HELLO"))
            .await
            .expect("send result");
        assert_eq!(results.recv().await.as_deref(), Some("HELLO"));

        hub.shutdown().await;
        assert!(hub.clients().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let hub = Hub::new(Arc::new(MessageRegistry::new()));
        let (local, mut remote) = pair();
        hub.attach(local);

        hub.shutdown().await;

        assert!(matches!(remote.recv().await, TransportEvent::Closed(_)));
        assert!(hub.clients().is_empty());
    }

    #[tokio::test]
    async fn test_attach_after_shutdown_closes_client() {
        let hub = Hub::new(Arc::new(MessageRegistry::new()));
        hub.shutdown().await;

        // A handshake that completed after shutdown registers its handle first
        let (local, mut remote) = pair();
        hub.clients().insert(local.handle());
        hub.attach(local);

        assert!(matches!(remote.recv().await, TransportEvent::Closed(_)));
        assert!(hub.clients().is_empty());
        assert!(hub.sessions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_round_trip_with_manager() {
        let (hub_registry, mut results) = result_collector();
        let hub = Hub::new(hub_registry);

        let (connector, mut listener) = MemoryConnector::channel();
        let accept_hub = hub.clone();
        tokio::spawn(async move {
            while let Some(connection) = listener.accept().await {
                accept_hub.attach(connection);
            }
        });

        let options = ClientOptions::parse("memory://hub").expect("options");
        let manager =
            ConnectionManager::new(options, Arc::new(connector), upper_client_registry());
        manager.start().expect("start");
        manager
            .wait_for(SessionState::Connected)
            .await
            .expect("connected");

        // The hub may still be attaching the memory peer
        while hub.clients().is_empty() {
            tokio::task::yield_now().await;
        }

        let report = hub
            .clients()
            .send_all(&Message::receive_message("hello"))
            .await;
        assert_eq!(report.delivered, 1);
        assert_eq!(results.recv().await.as_deref(), Some("HELLO"));

        manager.stop().await;
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_end_to_end_over_websocket() {
        let (hub_registry, mut results) = result_collector();
        let hub = Hub::new(hub_registry);

        let listener = WebSocketListener::bind(localhost(), "/myHub")
            .await
            .expect("bind");
        let options = ClientOptions::parse(&listener.ws_url())
            .expect("options")
            .with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(100)));

        let serving = hub.clone();
        let server = tokio::spawn(async move { serving.serve(listener).await });

        let manager = ConnectionManager::new(
            options,
            Arc::new(WebSocketConnector::new()),
            upper_client_registry(),
        );
        manager.start().expect("start");
        manager
            .wait_for(SessionState::Connected)
            .await
            .expect("connected");

        // Registered before the client saw the ack
        assert_eq!(hub.clients().len(), 1);

        let report = hub
            .clients()
            .send_all(&Message::receive_message("hello"))
            .await;
        assert_eq!(report.delivered, 1);
        assert_eq!(results.recv().await.as_deref(), Some("HELLO"));

        manager.stop().await;
        hub.shutdown().await;
        server.await.expect("serve loop");

        assert!(hub.clients().is_empty());
    }
}
