//! Connection handles and the WebSocket event loop.
//!
//! A [`Connection`] is the local end of one duplex transport. It is split
//! into a cloneable [`ConnectionHandle`] for outbound sends and a stream of
//! inbound [`TransportEvent`]s. Whatever drives the underlying socket (the
//! WebSocket event loop here, or the in-memory bridge) owns the other end of
//! those channels.
//!
//! # Event Loop
//!
//! The WebSocket loop is a tokio task that handles:
//!
//! - Incoming invocation frames, forwarded as [`TransportEvent::Message`]
//! - Outgoing sends, acknowledged once the frame is written
//! - Keep-alive pings and the idle timeout
//! - Exactly one terminal [`TransportEvent::Closed`] with its [`CloseReason`]

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval_at, sleep_until};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{Frame, Message};

// ============================================================================
// Constants
// ============================================================================

/// Default interval between keep-alive pings.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Default time without inbound traffic before the connection is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Connector
// ============================================================================

/// Establishes transports to an endpoint.
///
/// Implemented by [`WebSocketConnector`](super::WebSocketConnector) for real
/// networking and [`MemoryConnector`](super::MemoryConnector) for tests.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects and completes the handshake.
    ///
    /// # Errors
    ///
    /// Any connect, timeout or handshake failure.
    async fn connect(&self, endpoint: &Url) -> Result<Connection>;
}

// ============================================================================
// CloseReason / TransportEvent
// ============================================================================

/// Why a transport ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by either side with a close handshake.
    Graceful,
    /// The socket failed.
    TransportError(String),
    /// Nothing was received within the idle timeout.
    Timeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graceful => f.write_str("graceful"),
            Self::TransportError(message) => write!(f, "transport error: {message}"),
            Self::Timeout => f.write_str("timeout"),
        }
    }
}

/// An inbound event from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A named message from the peer.
    Message(Message),
    /// The transport ended. Always the last event.
    Closed(CloseReason),
}

// ============================================================================
// KeepAlive
// ============================================================================

/// Ping interval and idle timeout for a WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    /// Interval between pings.
    pub interval: Duration,
    /// Silence after which the connection is considered dead.
    pub idle_timeout: Duration,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Commands for whatever drives the transport.
pub(crate) enum ConnectionCommand {
    /// Send a message; ack once written.
    Send {
        message: Message,
        ack_tx: oneshot::Sender<Result<()>>,
    },
    /// Close gracefully.
    Close,
}

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Cloneable send side of a [`Connection`].
///
/// All operations are non-blocking apart from waiting for the write ack.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionHandle {
    pub(crate) fn new(id: ConnectionId, command_tx: mpsc::UnboundedSender<ConnectionCommand>) -> Self {
        Self { id, command_tx }
    }

    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Sends a message and waits until it has been written.
    ///
    /// # Errors
    ///
    /// - [`Error::TransportClosed`] if the transport has ended
    /// - [`Error::WebSocket`] / [`Error::Json`] if the write failed
    pub async fn send(&self, message: Message) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Send { message, ack_tx })
            .map_err(|_| Error::TransportClosed)?;

        ack_rx.await.map_err(|_| Error::TransportClosed)?
    }

    /// Requests a graceful close. Idempotent.
    pub fn close(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Close);
    }

    /// Returns `true` once the transport has stopped accepting commands.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Resolves once the transport has stopped accepting commands.
    pub async fn closed(&self) {
        self.command_tx.closed().await;
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Local end of one duplex transport.
pub struct Connection {
    handle: ConnectionHandle,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn from_parts(
        handle: ConnectionHandle,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { handle, events }
    }

    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    /// Returns a clone of the send handle.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Sends a message. See [`ConnectionHandle::send`].
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionHandle::send`].
    pub async fn send(&self, message: Message) -> Result<()> {
        self.handle.send(message).await
    }

    /// Requests a graceful close.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Waits for the next inbound event.
    ///
    /// Yields `Closed(TransportError)` if the driver vanished without
    /// reporting a reason.
    pub async fn recv(&mut self) -> TransportEvent {
        self.events.recv().await.unwrap_or_else(|| {
            TransportEvent::Closed(CloseReason::TransportError(
                "transport driver ended".to_string(),
            ))
        })
    }

    /// Splits into the send handle and the inbound event receiver.
    #[must_use]
    pub fn into_parts(self) -> (ConnectionHandle, mpsc::UnboundedReceiver<TransportEvent>) {
        (self.handle, self.events)
    }
}

// ============================================================================
// WebSocket Event Loop
// ============================================================================

type WsSink<S> = SplitSink<WebSocketStream<S>, WsMessage>;

/// Channels for a connection whose driver has not been spawned yet.
pub(crate) struct ConnectionChannels {
    pub(crate) command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    pub(crate) event_tx: mpsc::UnboundedSender<TransportEvent>,
}

/// Creates a connection and the driver-side channels.
pub(crate) fn channels(id: ConnectionId) -> (Connection, ConnectionChannels) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let connection = Connection::from_parts(ConnectionHandle::new(id, command_tx), event_rx);

    (connection, ConnectionChannels { command_rx, event_tx })
}

/// Spawns the event loop for an already handshaken WebSocket.
pub(crate) fn spawn_websocket<S>(
    ws_stream: WebSocketStream<S>,
    id: ConnectionId,
    keep_alive: KeepAlive,
    channels: ConnectionChannels,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(run_event_loop(ws_stream, id, keep_alive, channels));
}

/// Event loop that handles WebSocket I/O.
async fn run_event_loop<S>(
    ws_stream: WebSocketStream<S>,
    id: ConnectionId,
    keep_alive: KeepAlive,
    channels: ConnectionChannels,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ConnectionChannels {
        mut command_rx,
        event_tx,
    } = channels;
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let mut ping = interval_at(Instant::now() + keep_alive.interval, keep_alive.interval);
    let mut last_seen = Instant::now();

    let reason = loop {
        let idle_deadline = last_seen + keep_alive.idle_timeout;

        tokio::select! {
            // Incoming frames from the peer
            message = ws_read.next() => {
                match message {
                    Some(Ok(message)) => {
                        last_seen = Instant::now();

                        match message {
                            WsMessage::Text(text) => handle_incoming_text(id, &text, &event_tx),
                            WsMessage::Close(frame) => {
                                debug!(%id, ?frame, "WebSocket closed by remote");
                                break CloseReason::Graceful;
                            }
                            // Pings are answered by tungstenite; pongs only refresh `last_seen`
                            _ => {}
                        }
                    }

                    Some(Err(e)) => {
                        warn!(%id, error = %e, "WebSocket error");
                        break CloseReason::TransportError(e.to_string());
                    }

                    None => {
                        debug!(%id, "WebSocket stream ended");
                        break CloseReason::TransportError("stream ended".to_string());
                    }
                }
            }

            // Commands from handles
            command = command_rx.recv() => {
                match command {
                    Some(ConnectionCommand::Send { message, ack_tx }) => {
                        let result = write_frame(&mut ws_write, &Frame::Invocation(message)).await;
                        let failure = result.as_ref().err().map(ToString::to_string);
                        let _ = ack_tx.send(result);

                        if let Some(failure) = failure {
                            break CloseReason::TransportError(failure);
                        }
                    }

                    Some(ConnectionCommand::Close) | None => {
                        debug!(%id, "Closing WebSocket");
                        let _ = ws_write.close().await;
                        break CloseReason::Graceful;
                    }
                }
            }

            _ = ping.tick() => {
                if let Err(e) = ws_write.send(WsMessage::Ping(Default::default())).await {
                    warn!(%id, error = %e, "Keep-alive ping failed");
                    break CloseReason::TransportError(e.to_string());
                }
                trace!(%id, "Ping sent");
            }

            () = sleep_until(idle_deadline) => {
                warn!(
                    %id,
                    idle_timeout_ms = keep_alive.idle_timeout.as_millis() as u64,
                    "No traffic within idle timeout"
                );
                let _ = ws_write.close().await;
                break CloseReason::Timeout;
            }
        }
    };

    // Handles must observe the close before the terminal event is read
    command_rx.close();
    drop(command_rx);

    let _ = event_tx.send(TransportEvent::Closed(reason.clone()));

    debug!(%id, %reason, "Event loop terminated");
}

/// Parses an inbound text frame and forwards invocations.
fn handle_incoming_text(
    id: ConnectionId,
    text: &str,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
) {
    match Frame::from_text(text) {
        Ok(Frame::Invocation(message)) => {
            trace!(%id, name = message.name(), "Invocation received");
            let _ = event_tx.send(TransportEvent::Message(message));
        }
        Ok(other) => {
            warn!(%id, frame = ?other, "Unexpected frame after handshake");
        }
        Err(e) => {
            warn!(%id, error = %e, "Failed to parse incoming frame");
        }
    }
}

/// Serializes and writes one frame.
pub(crate) async fn write_frame<S>(ws_write: &mut WsSink<S>, frame: &Frame) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let text = frame.to_text()?;
    ws_write.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_alive_defaults() {
        let keep_alive = KeepAlive::default();
        assert_eq!(keep_alive.interval.as_secs(), 15);
        assert_eq!(keep_alive.idle_timeout.as_secs(), 30);
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::Graceful.to_string(), "graceful");
        assert_eq!(CloseReason::Timeout.to_string(), "timeout");
        assert_eq!(
            CloseReason::TransportError("reset".into()).to_string(),
            "transport error: reset"
        );
    }

    #[tokio::test]
    async fn test_send_after_driver_gone_is_transport_closed() {
        let (connection, channels) = channels(ConnectionId::generate());
        drop(channels);

        assert!(connection.handle().is_closed());
        let err = connection
            .send(Message::receive_message("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransportClosed));
    }

    #[tokio::test]
    async fn test_recv_without_driver_reports_transport_error() {
        let (mut connection, channels) = channels(ConnectionId::generate());
        drop(channels);

        assert!(matches!(
            connection.recv().await,
            TransportEvent::Closed(CloseReason::TransportError(_))
        ));
    }
}
