//! Timed and on-demand pushes to connected clients.
//!
//! # Timing
//!
//! [`ServerBroadcaster::run`] ticks on a steady interval. The first push
//! happens one interval after start. A tick that overruns delays the next
//! one rather than bursting to catch up. An empty client set is a silent
//! no-op.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::identifiers::ConnectionId;
use crate::protocol::Message;

use super::clients::{BroadcastReport, ClientSet};

// ============================================================================
// Types
// ============================================================================

/// Builds the message for each tick.
pub type MessageFactory = Arc<dyn Fn() -> Message + Send + Sync>;

/// Default tick message: `ReceiveMessage("Server message at <local time>")`.
#[must_use]
pub fn server_time_message() -> Message {
    let now = Local::now().format("%Y-%m-%d %H:%M:%S");
    Message::receive_message(format!("Server message at {now}"))
}

// ============================================================================
// ServerBroadcaster
// ============================================================================

/// Pushes messages to every client in a [`ClientSet`].
#[derive(Clone)]
pub struct ServerBroadcaster {
    clients: Arc<ClientSet>,
    interval: Duration,
    factory: MessageFactory,
}

impl fmt::Debug for ServerBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBroadcaster")
            .field("clients", &self.clients.len())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ServerBroadcaster {
    /// Creates a broadcaster using the server-time message.
    #[must_use]
    pub fn new(clients: Arc<ClientSet>, interval: Duration) -> Self {
        Self {
            clients,
            interval,
            factory: Arc::new(server_time_message),
        }
    }

    /// Replaces the tick message factory.
    #[must_use]
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Message + Send + Sync + 'static,
    {
        self.factory = Arc::new(factory);
        self
    }

    /// Tick interval.
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Builds one message and pushes it to every client.
    pub async fn tick(&self) -> BroadcastReport {
        let message = (self.factory)();
        self.broadcast(&message).await
    }

    /// Pushes `message` to every client.
    pub async fn broadcast(&self, message: &Message) -> BroadcastReport {
        if self.clients.is_empty() {
            debug!(name = message.name(), "No clients connected, skipping push");
            return BroadcastReport::default();
        }

        info!(name = message.name(), digest = %message.digest(), "Sending message");

        let report = self.clients.send_all(message).await;
        if report.failed > 0 {
            warn!(
                delivered = report.delivered,
                failed = report.failed,
                "Push partially failed"
            );
        }
        report
    }

    /// Pushes `message` to the listed clients.
    pub async fn send_to(&self, ids: &[ConnectionId], message: &Message) -> BroadcastReport {
        self.clients.send_to(ids, message).await
    }

    /// Ticks until `shutdown` is cancelled.
    ///
    /// Cancellation abandons a tick in progress.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = self.interval.as_millis() as u64, "Broadcaster starting");

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = self.tick() => {}
            }
        }

        info!("Broadcaster stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================
