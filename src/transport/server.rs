//! WebSocket listener for the hub.
//!
//! # Connection Flow
//!
//! 1. Bind the TCP listener (port 0 picks a random port)
//! 2. [`WebSocketListener::accept`] waits for a TCP connection
//! 3. [`WebSocketListener::handshake`] upgrades on the hub path only,
//!    validates the client's `handshake` frame, registers the connection
//!    via a callback and answers `handshakeAck`
//! 4. The event loop is spawned and a [`Connection`] is returned

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::result::Result as StdResult;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info, warn};

use crate::config::ServerOptions;
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::Frame;

use super::client::DEFAULT_HANDSHAKE_TIMEOUT;
use super::connection::{Connection, ConnectionHandle, KeepAlive, channels, spawn_websocket};

// ============================================================================
// WebSocketListener
// ============================================================================

/// A bound WebSocket endpoint serving one hub path.
///
/// # Example
///
/// ```ignore
/// use hubwire::transport::WebSocketListener;
///
/// let listener = WebSocketListener::bind("127.0.0.1:0".parse()?, "/myHub").await?;
/// println!("Hub at {}", listener.ws_url());
///
/// let (stream, addr) = listener.accept().await?;
/// let connection = listener.handshake(stream, addr, |_| {}).await?;
/// ```
#[derive(Debug)]
pub struct WebSocketListener {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Address the listener is bound to.
    local_addr: SocketAddr,
    /// Request path accepted for upgrade.
    path: String,
    handshake_timeout: Duration,
    keep_alive: KeepAlive,
}

impl WebSocketListener {
    /// Binds to `addr` and serves the hub at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(addr: SocketAddr, path: impl Into<String>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        debug!(%local_addr, "WebSocket listener bound");

        Ok(Self {
            listener,
            local_addr,
            path: path.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            keep_alive: KeepAlive::default(),
        })
    }

    /// Binds using resolved hub options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn from_options(options: &ServerOptions) -> Result<Self> {
        let listener = Self::bind(options.bind_address, options.hub_path.clone()).await?;

        Ok(listener
            .with_handshake_timeout(options.handshake_timeout)
            .with_keep_alive(options.keep_alive))
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Sets keep-alive behavior for accepted connections.
    #[inline]
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the served path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the URL clients should dial.
    ///
    /// Format: `ws://{addr}{path}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, self.path)
    }

    /// Waits for the next TCP connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if accept fails.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        Ok(self.listener.accept().await?)
    }

    /// Upgrades a TCP stream and runs the hub handshake.
    ///
    /// `on_accept` runs after the handshake is validated and before the
    /// acknowledgement is written, so the connection can be registered
    /// before the client considers itself connected.
    ///
    /// # Errors
    ///
    /// - [`Error::Handshake`] if the upgrade or handshake is refused
    /// - [`Error::ConnectTimeout`] if the client stays silent too long
    pub async fn handshake<F>(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        on_accept: F,
    ) -> Result<Connection>
    where
        F: FnOnce(&ConnectionHandle),
    {
        let path = self.path.clone();
        let check_path = move |request: &Request, response: Response| {
            check_hub_path(&path, request, response)
        };

        let mut ws_stream = tokio_tungstenite::accept_hdr_async(stream, check_path)
            .await
            .map_err(|e| Error::handshake(format!("WebSocket upgrade failed: {e}")))?;

        debug!(%addr, "WebSocket upgraded");

        let handshake = timeout(self.handshake_timeout, read_handshake(&mut ws_stream))
            .await
            .map_err(|_| Error::connect_timeout(self.handshake_timeout.as_millis() as u64))?;

        if let Err(e) = handshake {
            warn!(%addr, error = %e, "Handshake rejected");
            let reply = Frame::HandshakeRejected {
                error: e.to_string(),
            };
            let _ = send_frame(&mut ws_stream, &reply).await;
            let _ = ws_stream.close(None).await;
            return Err(e);
        }

        let connection_id = ConnectionId::generate();
        let (connection, driver) = channels(connection_id);

        on_accept(&connection.handle());

        send_frame(&mut ws_stream, &Frame::HandshakeAck { connection_id }).await?;

        info!(%addr, %connection_id, "Client connected");

        spawn_websocket(ws_stream, connection_id, self.keep_alive, driver);

        Ok(connection)
    }
}

/// Upgrade callback: only the hub path is served.
fn check_hub_path(
    path: &str,
    request: &Request,
    response: Response,
) -> StdResult<Response, ErrorResponse> {
    if request.uri().path() == path {
        return Ok(response);
    }

    let mut error = ErrorResponse::new(Some(format!("No hub at {}", request.uri().path())));
    *error.status_mut() = StatusCode::NOT_FOUND;
    Err(error)
}

/// Reads the first data frame and validates it as a handshake.
async fn read_handshake(ws_stream: &mut WebSocketStream<TcpStream>) -> Result<()> {
    while let Some(message) = ws_stream.next().await {
        match message? {
            WsMessage::Text(text) => return Frame::from_text(&text)?.validate_handshake(),
            WsMessage::Close(_) => {
                return Err(Error::handshake("Connection closed during handshake"));
            }
            _ => {}
        }
    }

    Err(Error::handshake("Connection ended during handshake"))
}

/// Writes one frame directly to an un-split stream.
async fn send_frame(ws_stream: &mut WebSocketStream<TcpStream>, frame: &Frame) -> Result<()> {
    use futures_util::SinkExt;

    ws_stream
        .send(WsMessage::Text(frame.to_text()?.into()))
        .await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
