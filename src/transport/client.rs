//! WebSocket connector for hub clients.
//!
//! # Connection Flow
//!
//! 1. Dial the endpoint URL (`ws://host:port/myHub`)
//! 2. Send the `handshake` frame
//! 3. Wait for `handshakeAck` (bounded by the handshake timeout)
//! 4. Spawn the event loop and hand back a [`Connection`]

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::Frame;

use super::connection::{Connection, Connector, KeepAlive, channels, spawn_websocket};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for the handshake reply.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// WebSocketConnector
// ============================================================================

/// [`Connector`] that dials a hub over WebSocket.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConnector {
    handshake_timeout: Duration,
    keep_alive: KeepAlive,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketConnector {
    /// Creates a connector with default timeouts.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            keep_alive: KeepAlive::default(),
        }
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Sets keep-alive behavior for established connections.
    #[inline]
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Connection> {
        debug!(%endpoint, "Dialing hub");

        let (mut ws_stream, _response) = tokio_tungstenite::connect_async(endpoint.as_str())
            .await
            .map_err(|e| Error::connect(endpoint.as_str(), e.to_string()))?;

        let handshake = Frame::handshake().to_text()?;
        ws_stream
            .send(WsMessage::Text(handshake.into()))
            .await
            .map_err(|e| Error::connect(endpoint.as_str(), e.to_string()))?;

        let connection_id = timeout(self.handshake_timeout, read_handshake_reply(&mut ws_stream))
            .await
            .map_err(|_| Error::connect_timeout(self.handshake_timeout.as_millis() as u64))??;

        info!(%endpoint, %connection_id, "Handshake completed");

        let (connection, driver) = channels(connection_id);
        spawn_websocket(ws_stream, connection_id, self.keep_alive, driver);

        Ok(connection)
    }
}

/// Reads frames until the server answers the handshake.
async fn read_handshake_reply<S>(ws_stream: &mut WebSocketStream<S>) -> Result<ConnectionId>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = ws_stream.next().await {
        match message? {
            WsMessage::Text(text) => {
                return match Frame::from_text(&text)? {
                    Frame::HandshakeAck { connection_id } => Ok(connection_id),
                    Frame::HandshakeRejected { error } => Err(Error::handshake(error)),
                    other => Err(Error::handshake(format!(
                        "Expected handshake reply, got {other:?}"
                    ))),
                };
            }
            WsMessage::Close(_) => {
                return Err(Error::handshake("Connection closed during handshake"));
            }
            _ => {}
        }
    }

    Err(Error::handshake("Connection ended during handshake"))
}

// ============================================================================
// Tests
// ============================================================================
