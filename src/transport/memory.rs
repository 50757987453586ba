//! In-process transport.
//!
//! [`pair`] creates two connected [`Connection`]s bridged by a tokio task.
//! [`MemoryConnector`] hands the remote ends to a [`MemoryListener`], which
//! lets a client manager talk to an in-process [`Hub`](crate::server::Hub)
//! without sockets.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

use super::connection::{
    CloseReason, Connection, ConnectionChannels, ConnectionCommand, Connector, TransportEvent,
    channels,
};

// ============================================================================
// Pair
// ============================================================================

/// Creates two connected ends sharing one [`ConnectionId`].
///
/// Closing either end (or dropping either end's event receiver) ends both
/// with [`CloseReason::Graceful`].
#[must_use]
pub fn pair() -> (Connection, Connection) {
    let id = ConnectionId::generate();
    let (local, local_channels) = channels(id);
    let (remote, remote_channels) = channels(id);

    tokio::spawn(run_bridge(id, local_channels, remote_channels));

    (local, remote)
}

/// Forwards sends from each end to the other until one side closes.
async fn run_bridge(id: ConnectionId, mut a: ConnectionChannels, mut b: ConnectionChannels) {
    loop {
        tokio::select! {
            command = a.command_rx.recv() => {
                if !forward(command, &b.event_tx) {
                    break;
                }
            }
            command = b.command_rx.recv() => {
                if !forward(command, &a.event_tx) {
                    break;
                }
            }
        }
    }

    a.command_rx.close();
    b.command_rx.close();
    let ConnectionChannels { command_rx: a_rx, event_tx: a_events } = a;
    let ConnectionChannels { command_rx: b_rx, event_tx: b_events } = b;
    drop(a_rx);
    drop(b_rx);

    let _ = a_events.send(TransportEvent::Closed(CloseReason::Graceful));
    let _ = b_events.send(TransportEvent::Closed(CloseReason::Graceful));

    debug!(%id, "Memory bridge closed");
}

/// Delivers one command to the peer. Returns `false` when the bridge should stop.
fn forward(
    command: Option<ConnectionCommand>,
    peer: &mpsc::UnboundedSender<TransportEvent>,
) -> bool {
    match command {
        Some(ConnectionCommand::Send { message, ack_tx }) => {
            let result = peer
                .send(TransportEvent::Message(message))
                .map_err(|_| Error::TransportClosed);
            let delivered = result.is_ok();
            let _ = ack_tx.send(result);
            delivered
        }
        Some(ConnectionCommand::Close) | None => false,
    }
}

// ============================================================================
// MemoryConnector / MemoryListener
// ============================================================================

/// [`Connector`] that produces in-memory pairs.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<Connection>,
}

/// Receives the remote ends created by a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryListener {
    peers: mpsc::UnboundedReceiver<Connection>,
}

impl MemoryConnector {
    /// Creates a connector and its listener.
    #[must_use]
    pub fn channel() -> (Self, MemoryListener) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        (Self { peers: peers_tx }, MemoryListener { peers: peers_rx })
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Connection> {
        let (local, remote) = pair();

        self.peers
            .send(remote)
            .map_err(|_| Error::connect(endpoint.as_str(), "memory listener dropped"))?;

        Ok(local)
    }
}

impl MemoryListener {
    /// Waits for the next connection. `None` once every connector is gone.
    pub async fn accept(&mut self) -> Option<Connection> {
        self.peers.recv().await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::Message;

    #[tokio::test]
    async fn test_pair_delivers_both_ways() {
        let (mut a, mut b) = pair();
        assert_eq!(a.id(), b.id());

        a.send(Message::receive_message("ping")).await.expect("send a->b");
        assert_eq!(
            b.recv().await,
            TransportEvent::Message(Message::receive_message("ping"))
        );

        b.send(Message::receive_result("PONG")).await.expect("send b->a");
        assert_eq!(
            a.recv().await,
            TransportEvent::Message(Message::receive_result("PONG"))
        );
    }

    #[tokio::test]
    async fn test_close_ends_both_sides() {
        let (mut a, mut b) = pair();
        a.close();

        assert_eq!(a.recv().await, TransportEvent::Closed(CloseReason::Graceful));
        assert_eq!(b.recv().await, TransportEvent::Closed(CloseReason::Graceful));
        assert!(b.handle().is_closed());

        let err = b.send(Message::receive_result("late")).await.unwrap_err();
        assert!(matches!(err, Error::TransportClosed));
    }

    #[tokio::test]
    async fn test_connector_hands_peer_to_listener() {
        let (connector, mut listener) = MemoryConnector::channel();
        let url = Url::parse("memory://hub").expect("url");

        let mut client = connector.connect(&url).await.expect("connect");
        let server = listener.accept().await.expect("peer");
        assert_eq!(client.id(), server.id());

        server.send(Message::receive_message("hi")).await.expect("send");
        assert_eq!(
            client.recv().await,
            TransportEvent::Message(Message::receive_message("hi"))
        );
    }

    #[tokio::test]
    async fn test_connector_without_listener_fails() {
        let (connector, listener) = MemoryConnector::channel();
        drop(listener);

        let url = Url::parse("memory://hub").expect("url");
        let err = connector.connect(&url).await.unwrap_err();
        assert!(err.is_connection_error());
    }
}
