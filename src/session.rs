//! One connection epoch: inbound dispatch and correlated replies.
//!
//! A [`ConnectionSession`] binds a live [`Connection`] to the shared
//! [`MessageRegistry`]. It reads inbound events in order and starts every
//! handler on its own task, so a slow handler never delays receipt of the
//! next message. Completions may therefore reply out of order.
//!
//! # Reply Rules
//!
//! | Handler outcome | Epoch current and transport open | Otherwise |
//! |-----------------|----------------------------------|-----------|
//! | `Ok(Some(v))` | `ReceiveResult(v)` sent | suppressed, logged |
//! | `Ok(None)` | nothing sent | nothing sent |
//! | `Err(_)` | logged with name and digest | logged |
//!
//! Stale replies are never retried.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::identifiers::{ConnectionId, Epoch};
use crate::protocol::{Message, RECEIVE_RESULT, payload_digest};
use crate::registry::{HandlerContext, MessageRegistry, PendingResult};
use crate::transport::{CloseReason, Connection, ConnectionHandle, TransportEvent};

// ============================================================================
// Constants
// ============================================================================

/// Default bound on waiting for in-flight handlers during shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// EpochClock
// ============================================================================

/// Shared counter of the current connection epoch.
///
/// Advanced by the supervisor each time a new transport is established;
/// read by reply tasks to detect staleness.
#[derive(Debug, Clone, Default)]
pub struct EpochClock(Arc<AtomicU64>);

impl EpochClock {
    /// Creates a clock at [`Epoch::ZERO`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current epoch.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Epoch {
        Epoch::new(self.0.load(Ordering::SeqCst))
    }

    /// Moves to the next epoch and returns it.
    #[inline]
    pub fn advance(&self) -> Epoch {
        Epoch::new(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Returns `true` if `epoch` is still current.
    #[inline]
    #[must_use]
    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.current() == epoch
    }
}

// ============================================================================
// ReplyOutcome
// ============================================================================

/// What happened to a handler's reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplyOutcome {
    /// Written to the transport.
    Sent,
    /// Not sent: the epoch advanced before completion.
    StaleEpoch,
    /// Not sent: the transport had already closed.
    TransportClosed,
    /// The send itself failed.
    Failed,
}

// ============================================================================
// ReplyRoute
// ============================================================================

/// Everything a reply task needs to deliver its result.
#[derive(Debug, Clone)]
struct ReplyRoute {
    name: String,
    digest: String,
    epoch: Epoch,
    clock: EpochClock,
    handle: ConnectionHandle,
}

impl ReplyRoute {
    /// Awaits the handler and routes its outcome.
    async fn complete(self, pending: PendingResult) {
        match pending.outcome().await {
            Ok(Some(value)) => {
                self.deliver(value).await;
            }
            Ok(None) => {
                debug!(name = %self.name, epoch = %self.epoch, "Handler completed without reply");
            }
            Err(Error::Cancelled) => {
                debug!(name = %self.name, epoch = %self.epoch, "Handler cancelled");
            }
            Err(e) => {
                error!(
                    name = %self.name,
                    digest = %self.digest,
                    epoch = %self.epoch,
                    error = %e,
                    "Handler failed"
                );
            }
        }
    }

    /// Sends `ReceiveResult(value)` if the epoch and transport are still live.
    async fn deliver(&self, value: Value) -> ReplyOutcome {
        if !self.clock.is_current(self.epoch) {
            warn!(
                name = %self.name,
                epoch = %self.epoch,
                current = %self.clock.current(),
                "Epoch advanced, reply suppressed"
            );
            return ReplyOutcome::StaleEpoch;
        }

        if self.handle.is_closed() {
            warn!(name = %self.name, epoch = %self.epoch, "Transport closed, reply suppressed");
            return ReplyOutcome::TransportClosed;
        }

        let reply = Message::new(RECEIVE_RESULT, value);
        let digest = reply.digest();

        match self.handle.send(reply).await {
            Ok(()) => {
                info!(name = %self.name, epoch = %self.epoch, %digest, "Sent result");
                ReplyOutcome::Sent
            }
            Err(e) => {
                let failure = Error::send_failure(RECEIVE_RESULT, e.to_string());
                warn!(epoch = %self.epoch, error = %failure, "Reply suppressed");
                ReplyOutcome::Failed
            }
        }
    }
}

// ============================================================================
// ConnectionSession
// ============================================================================

/// Drives one transport for one epoch.
pub struct ConnectionSession {
    epoch: Epoch,
    clock: EpochClock,
    connection: Connection,
    registry: Arc<MessageRegistry>,
    /// Stop requested by the supervisor.
    shutdown: CancellationToken,
    /// Handed to handlers; cancelled when this epoch ends.
    handlers: CancellationToken,
    /// Reply tasks for handlers still running.
    in_flight: JoinSet<()>,
    drain_timeout: Duration,
}

impl ConnectionSession {
    /// Binds `connection` to `registry` for the clock's current epoch.
    #[must_use]
    pub fn new(
        connection: Connection,
        registry: Arc<MessageRegistry>,
        clock: EpochClock,
        shutdown: CancellationToken,
    ) -> Self {
        let handlers = shutdown.child_token();

        Self {
            epoch: clock.current(),
            clock,
            connection,
            registry,
            shutdown,
            handlers,
            in_flight: JoinSet::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Sets the bound on draining handlers at shutdown.
    #[inline]
    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Epoch this session belongs to.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Connection ID of the bound transport.
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Runs until the transport closes or shutdown is requested.
    ///
    /// Returns why the transport ended. On shutdown the transport is closed
    /// gracefully and in-flight handlers are drained (bounded, then aborted).
    /// On a transport close, handlers are cancelled and their reply tasks
    /// detached; any late result is suppressed by the epoch check.
    pub async fn run(mut self) -> CloseReason {
        info!(
            epoch = %self.epoch,
            connection_id = %self.connection.id(),
            handlers = self.registry.len(),
            "Session bound"
        );

        let reason = loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => {
                    self.close_gracefully().await;
                    self.drain().await;
                    break CloseReason::Graceful;
                }

                event = self.connection.recv() => {
                    match event {
                        TransportEvent::Message(message) => self.dispatch(message),
                        TransportEvent::Closed(reason) => {
                            self.handlers.cancel();
                            self.in_flight.detach_all();
                            break reason;
                        }
                    }
                }

                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        error!(epoch = %self.epoch, error = %e, "Reply task panicked");
                    }
                }
            }
        };

        debug!(epoch = %self.epoch, %reason, "Session ended");
        reason
    }

    /// Starts the handler for one inbound message.
    fn dispatch(&mut self, message: Message) {
        let (name, payload) = message.into_parts();
        let digest = payload_digest(&payload);

        info!(epoch = %self.epoch, %name, %digest, "Message received");

        let ctx = HandlerContext::new(name.as_str(), self.epoch, self.handlers.clone());

        // Unknown names are logged by the registry and dropped
        let Ok(pending) = self.registry.dispatch(&name, payload, ctx) else {
            return;
        };

        let route = ReplyRoute {
            name,
            digest,
            epoch: self.epoch,
            clock: self.clock.clone(),
            handle: self.connection.handle(),
        };

        self.in_flight.spawn(route.complete(pending));
    }

    /// Closes the transport and waits (bounded) for the driver to confirm.
    async fn close_gracefully(&mut self) {
        self.connection.close();

        let confirmed = timeout(self.drain_timeout, async {
            loop {
                if let TransportEvent::Closed(_) = self.connection.recv().await {
                    break;
                }
            }
        })
        .await;

        if confirmed.is_err() {
            warn!(epoch = %self.epoch, "Transport did not confirm close");
        }
    }

    /// Waits for in-flight handlers, aborting whatever outlives the bound.
    async fn drain(&mut self) {
        self.handlers.cancel();

        if self.in_flight.is_empty() {
            return;
        }

        let drained = timeout(self.drain_timeout, async {
            while self.in_flight.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                epoch = %self.epoch,
                remaining = self.in_flight.len(),
                "Aborting in-flight handlers"
            );
            self.in_flight.shutdown().await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::sync::{mpsc, oneshot};
    use tracing::Level;

    use crate::error::Result;
    use crate::protocol::RECEIVE_MESSAGE;
    use crate::testing::EventCapture;
    use crate::transport::pair;

    fn upper_registry() -> Arc<MessageRegistry> {
        let registry = MessageRegistry::new();
        registry.on(RECEIVE_MESSAGE, |message: String, _ctx| async move {
            if message == "bad" {
                return Err(Error::handler(RECEIVE_MESSAGE, "refusing bad input"));
            }
            Ok(message.to_uppercase())
        });
        Arc::new(registry)
    }

    fn start_session(
        registry: Arc<MessageRegistry>,
    ) -> (Connection, CancellationToken, tokio::task::JoinHandle<CloseReason>) {
        let (local, remote) = pair();
        let clock = EpochClock::new();
        clock.advance();

        let shutdown = CancellationToken::new();
        let session = ConnectionSession::new(local, registry, clock, shutdown.clone());
        (remote, shutdown, tokio::spawn(session.run()))
    }

    async fn expect_message(peer: &mut Connection) -> Message {
        match peer.recv().await {
            TransportEvent::Message(message) => message,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_epoch_clock_advances() {
        let clock = EpochClock::new();
        assert_eq!(clock.current(), Epoch::ZERO);

        let first = clock.advance();
        assert_eq!(first, Epoch::new(1));
        assert!(clock.is_current(first));

        clock.advance();
        assert!(!clock.is_current(first));
    }

    #[tokio::test]
    async fn test_message_is_answered_with_result() {
        let (mut peer, shutdown, session) = start_session(upper_registry());

        peer.send(Message::receive_message("hello")).await.expect("push");
        assert_eq!(expect_message(&mut peer).await, Message::receive_result("HELLO"));

        shutdown.cancel();
        assert_eq!(session.await.expect("join"), CloseReason::Graceful);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_session() {
        let (mut peer, shutdown, session) = start_session(upper_registry());

        peer.send(Message::receive_message("bad")).await.expect("push bad");
        peer.send(Message::receive_message("good")).await.expect("push good");

        // Only the good message produces a reply
        assert_eq!(expect_message(&mut peer).await, Message::receive_result("GOOD"));
        assert!(!session.is_finished());

        shutdown.cancel();
        session.await.expect("join");
    }

    #[tokio::test]
    async fn test_unknown_message_is_dropped() {
        let (mut peer, shutdown, session) = start_session(upper_registry());

        peer.send(Message::new("Nope", json!(1))).await.expect("push unknown");
        peer.send(Message::receive_message("next")).await.expect("push next");

        assert_eq!(expect_message(&mut peer).await, Message::receive_result("NEXT"));

        shutdown.cancel();
        session.await.expect("join");
    }

    #[tokio::test]
    async fn test_unknown_message_logs_one_warning() {
        let capture = EventCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        let (mut peer, shutdown, session) = start_session(upper_registry());

        peer.send(Message::new("Nope", json!(1))).await.expect("push unknown");
        peer.send(Message::receive_message("next")).await.expect("push next");
        assert_eq!(expect_message(&mut peer).await, Message::receive_result("NEXT"));

        shutdown.cancel();
        session.await.expect("join");

        let warnings = capture.matching(Level::WARN, "No handler registered for message");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field("name"), Some("Nope"));
    }

    #[tokio::test]
    async fn test_slow_handler_does_not_block_later_messages() {
        let registry = MessageRegistry::new();
        let (gate_tx, gate_rx) = mpsc::unbounded_channel::<oneshot::Receiver<()>>();
        let gate_rx = Arc::new(tokio::sync::Mutex::new(gate_rx));

        registry.on(RECEIVE_MESSAGE, move |message: String, _ctx| {
            let gate_rx = Arc::clone(&gate_rx);
            async move {
                if message == "slow" {
                    let gate = gate_rx.lock().await.recv().await;
                    if let Some(gate) = gate {
                        let _ = gate.await;
                    }
                }
                Ok::<_, Error>(message.to_uppercase())
            }
        });

        let (release_tx, release_rx) = oneshot::channel();
        gate_tx.send(release_rx).expect("gate");

        let (mut peer, shutdown, session) = start_session(Arc::new(registry));

        peer.send(Message::receive_message("slow")).await.expect("push slow");
        peer.send(Message::receive_message("fast")).await.expect("push fast");

        // Completion order, not receipt order
        assert_eq!(expect_message(&mut peer).await, Message::receive_result("FAST"));

        release_tx.send(()).expect("release");
        assert_eq!(expect_message(&mut peer).await, Message::receive_result("SLOW"));

        shutdown.cancel();
        session.await.expect("join");
    }

    #[tokio::test]
    async fn test_peer_close_ends_session() {
        let (peer, _shutdown, session) = start_session(upper_registry());

        peer.close();
        assert_eq!(session.await.expect("join"), CloseReason::Graceful);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_cooperative_handlers() {
        let registry = MessageRegistry::new();
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let (finished_tx, mut finished_rx) = mpsc::unbounded_channel::<Result<()>>();

        registry.on(RECEIVE_MESSAGE, move |message: String, ctx| {
            let started_tx = started_tx.clone();
            let finished_tx = finished_tx.clone();
            async move {
                let _ = started_tx.send(());
                let waited = ctx.sleep(Duration::from_secs(3600)).await;
                let _ = finished_tx.send(waited);
                Ok::<_, Error>(message)
            }
        });

        let (peer, shutdown, session) = start_session(Arc::new(registry));
        peer.send(Message::receive_message("long")).await.expect("push");
        started_rx.recv().await.expect("handler started");

        shutdown.cancel();
        assert_eq!(session.await.expect("join"), CloseReason::Graceful);

        let waited = finished_rx.recv().await.expect("handler finished");
        assert!(matches!(waited, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_stale_epoch_reply_is_suppressed() {
        let (local, mut remote) = pair();
        let clock = EpochClock::new();
        let epoch = clock.advance();

        let route = ReplyRoute {
            name: RECEIVE_MESSAGE.to_string(),
            digest: String::new(),
            epoch,
            clock: clock.clone(),
            handle: local.handle(),
        };

        clock.advance();
        assert_eq!(route.deliver(json!("LATE")).await, ReplyOutcome::StaleEpoch);

        // Nothing reached the peer
        local.close();
        assert_eq!(remote.recv().await, TransportEvent::Closed(CloseReason::Graceful));
    }

    #[tokio::test]
    async fn test_closed_transport_reply_is_suppressed() {
        let (local, mut remote) = pair();
        let clock = EpochClock::new();
        let epoch = clock.advance();

        remote.close();
        assert_eq!(remote.recv().await, TransportEvent::Closed(CloseReason::Graceful));
        local.handle().closed().await;

        let route = ReplyRoute {
            name: RECEIVE_MESSAGE.to_string(),
            digest: String::new(),
            epoch,
            clock,
            handle: local.handle(),
        };
        assert_eq!(
            route.deliver(json!("LATE")).await,
            ReplyOutcome::TransportClosed
        );
    }
}
