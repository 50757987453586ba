//! Connection manager: the client's reconnect state machine.
//!
//! A single supervisor task owns the live transport and is the only writer
//! of [`SessionState`]. Callers observe it through a `watch` channel
//! ([`ConnectionManager::state`], [`ConnectionManager::wait_for`]) and a
//! `broadcast` of every [`StateChange`] ([`ConnectionManager::subscribe`]).
//!
//! # Epochs
//!
//! Each established transport starts a new [`Epoch`]. Handlers receive the
//! epoch's cancellation token; replies from an epoch that has since ended
//! are suppressed by the session.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hubwire::{ClientOptions, ConnectionManager, MessageRegistry, WebSocketConnector};
//!
//! let registry = Arc::new(MessageRegistry::new());
//! let options = ClientOptions::parse("ws://localhost:5051/myHub")?;
//! let manager = ConnectionManager::new(options, Arc::new(WebSocketConnector::new()), registry);
//!
//! manager.start()?;
//! manager.wait_for(SessionState::Connected).await?;
//! manager.stop().await;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::identifiers::Epoch;
use crate::registry::MessageRegistry;
use crate::session::{ConnectionSession, EpochClock};
use crate::transport::{Connection, Connector};

use super::state::{SessionState, StateChange};

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the lifecycle event channel.
const STATE_EVENT_CAPACITY: usize = 64;

// ============================================================================
// Lifecycle
// ============================================================================

/// Whether the supervisor has been started.
enum Lifecycle {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Keeps one client connection alive across transport failures.
pub struct ConnectionManager {
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    registry: Arc<MessageRegistry>,
    clock: EpochClock,
    shutdown: CancellationToken,
    state_tx: watch::Sender<SessionState>,
    events_tx: broadcast::Sender<StateChange>,
    lifecycle: Mutex<Lifecycle>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.options.endpoint.as_str())
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a stopped manager.
    #[must_use]
    pub fn new(
        options: ClientOptions,
        connector: Arc<dyn Connector>,
        registry: Arc<MessageRegistry>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (events_tx, _) = broadcast::channel(STATE_EVENT_CAPACITY);

        Self {
            options,
            connector,
            registry,
            clock: EpochClock::new(),
            shutdown: CancellationToken::new(),
            state_tx,
            events_tx,
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Ties the manager to an external cancellation signal.
    ///
    /// Cancelling `token` has the same effect as [`stop`](Self::stop);
    /// stopping the manager does not cancel `token`.
    #[must_use]
    pub fn with_shutdown_token(mut self, token: &CancellationToken) -> Self {
        self.shutdown = token.child_token();
        self
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Current epoch. [`Epoch::ZERO`] until the first connection.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.clock.current()
    }

    /// Registry shared by every epoch.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    /// Receives every subsequent state change.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events_tx.subscribe()
    }

    /// Waits until the manager is in `state`.
    ///
    /// Returns immediately if it already is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stopped`] if the state can no longer change.
    pub async fn wait_for(&self, state: SessionState) -> Result<()> {
        let mut state_rx = self.state_tx.subscribe();
        state_rx
            .wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .map_err(|_| Error::Stopped)
    }

    /// Starts the supervisor.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStarted`] if it is already running
    /// - [`Error::Stopped`] if it was stopped (a manager runs once)
    /// - [`Error::Config`] if the options are invalid
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();

        match *lifecycle {
            Lifecycle::Running(_) => return Err(Error::AlreadyStarted),
            Lifecycle::Stopped => return Err(Error::Stopped),
            Lifecycle::Idle => {}
        }

        self.options.validate()?;

        let supervisor = Supervisor {
            options: self.options.clone(),
            connector: Arc::clone(&self.connector),
            registry: Arc::clone(&self.registry),
            clock: self.clock.clone(),
            shutdown: self.shutdown.clone(),
            state_tx: self.state_tx.clone(),
            events_tx: self.events_tx.clone(),
        };

        info!(endpoint = %self.options.endpoint, "Connection manager starting");

        *lifecycle = Lifecycle::Running(tokio::spawn(supervisor.run()));
        Ok(())
    }

    /// Stops the supervisor and releases the transport.
    ///
    /// Idempotent. Returns once the state is
    /// [`Disconnected`](SessionState::Disconnected).
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);

        match previous {
            Lifecycle::Running(task) => {
                if let Err(e) = task.await {
                    error!(error = %e, "Supervisor task failed");
                    self.state_tx.send_replace(SessionState::Disconnected);
                }
                info!("Connection manager stopped");
            }
            // Another caller is joining the task
            Lifecycle::Stopped => {
                let _ = self.wait_for(SessionState::Disconnected).await;
            }
            Lifecycle::Idle => {}
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// The task that owns the transport.
struct Supervisor {
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    registry: Arc<MessageRegistry>,
    clock: EpochClock,
    shutdown: CancellationToken,
    state_tx: watch::Sender<SessionState>,
    events_tx: broadcast::Sender<StateChange>,
}

impl Supervisor {
    async fn run(self) {
        let mut failures: u32 = 0;

        while !self.shutdown.is_cancelled() {
            self.transition(SessionState::Connecting);

            let connection = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                result = self.connect() => result,
            };

            match connection {
                Ok(connection) => {
                    failures = 0;
                    self.serve(connection).await;

                    if self.shutdown.is_cancelled() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        endpoint = %self.options.endpoint,
                        attempt = failures.saturating_add(1),
                        error = %e,
                        "Connect failed"
                    );
                }
            }

            let delay = self.options.reconnect.next_delay(failures);
            failures = failures.saturating_add(1);

            self.transition(SessionState::Reconnecting);
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = failures,
                "Reconnecting after backoff"
            );

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = sleep(delay) => {}
            }
        }

        self.transition(SessionState::ShuttingDown);
        self.transition(SessionState::Disconnected);
    }

    /// One bounded connect attempt.
    async fn connect(&self) -> Result<Connection> {
        let timeout_ms = self.options.connect_timeout.as_millis() as u64;

        timeout(
            self.options.connect_timeout,
            self.connector.connect(&self.options.endpoint),
        )
        .await
        .map_err(|_| Error::connect_timeout(timeout_ms))?
    }

    /// Runs a session for a fresh epoch until it ends.
    async fn serve(&self, connection: Connection) {
        let epoch = self.clock.advance();
        let connection_id = connection.id();

        self.transition(SessionState::Connected);
        info!(endpoint = %self.options.endpoint, %connection_id, %epoch, "Connected");

        let session = ConnectionSession::new(
            connection,
            Arc::clone(&self.registry),
            self.clock.clone(),
            self.shutdown.child_token(),
        )
        .with_drain_timeout(self.options.drain_timeout);

        let session = session.run();
        tokio::pin!(session);

        let reason = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                self.transition(SessionState::ShuttingDown);
                (&mut session).await
            }
            reason = &mut session => reason,
        };

        if self.shutdown.is_cancelled() {
            debug!(%connection_id, %epoch, %reason, "Session closed for shutdown");
        } else {
            warn!(%connection_id, %epoch, %reason, "Disconnected");
        }
    }

    /// Publishes a state change. No-op if the state is unchanged.
    fn transition(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous == state {
            return;
        }

        let epoch = self.clock.current();
        debug!(from = %previous, to = %state, %epoch, "State transition");

        // No subscribers is fine
        let _ = self.events_tx.send(StateChange { state, epoch });
    }
}

// ============================================================================
// Tests
// ============================================================================
