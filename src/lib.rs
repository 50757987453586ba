//! hubwire - Persistent bidirectional hub messaging over WebSocket.
//!
//! A hub pushes named messages to connected clients; each client runs the
//! handler registered for the name and sends the result back. Clients keep
//! their connection alive across failures with backoff.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────┐                 ┌────────────────────────────┐
//! │  Client                    │                 │  Hub                       │
//! │                            │  ReceiveMessage │                            │
//! │  ConnectionManager         │◄────────────────│  ServerBroadcaster         │
//! │    └ ConnectionSession     │                 │    └ ClientSet             │
//! │        └ MessageRegistry   │  ReceiveResult  │  ConnectionSession (each)  │
//! │                            │────────────────►│    └ MessageRegistry       │
//! └────────────────────────────┘                 └────────────────────────────┘
//! ```
//!
//! Key design principles:
//!
//! - The manager's supervisor task is the only writer of connection state
//! - Every transport is one [`Epoch`]; late replies from an ended epoch are dropped
//! - Each inbound message runs on its own task; slow handlers never block receipt
//! - Handlers get a cancellation token for their long waits
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hubwire::{
//!     ConnectionManager, Error, MessageRegistry, RECEIVE_MESSAGE, Result, SessionState,
//!     Settings, WebSocketConnector,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = Arc::new(MessageRegistry::new());
//!     registry.on(RECEIVE_MESSAGE, |message: String, _ctx| async move {
//!         Ok::<_, Error>(message.to_uppercase())
//!     });
//!
//!     let options = Settings::default().client_options()?;
//!     let manager =
//!         ConnectionManager::new(options, Arc::new(WebSocketConnector::new()), registry);
//!
//!     manager.start()?;
//!     manager.wait_for(SessionState::Connected).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`ConnectionManager`], states and backoff |
//! | [`config`] | [`Settings`], [`ClientOptions`], [`ServerOptions`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | [`ConnectionId`] and [`Epoch`] |
//! | [`protocol`] | [`Message`] and wire frames |
//! | [`registry`] | [`MessageRegistry`] and handler types |
//! | [`server`] | [`Hub`], [`ClientSet`], [`ServerBroadcaster`] |
//! | [`session`] | [`ConnectionSession`] and [`EpochClock`] |
//! | [`transport`] | WebSocket and in-memory transports |

// ============================================================================
// Modules
// ============================================================================

/// Client side: connection manager, states and backoff.
pub mod client;

/// Configuration and resolved options.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire protocol types.
pub mod protocol;

/// Message name to handler mapping.
pub mod registry;

/// Server side: hub, client set and broadcaster.
pub mod server;

/// One connection epoch: dispatch and replies.
pub mod session;

/// Transport layer.
///
/// WebSocket connector and listener, plus in-memory pairs.
pub mod transport;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ConnectionManager, ReconnectPolicy, SessionState, StateChange};

// Configuration
pub use config::{ClientOptions, ServerOptions, Settings};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, Epoch};

// Protocol types
pub use protocol::{Message, RECEIVE_MESSAGE, RECEIVE_RESULT};

// Registry types
pub use registry::{Handler, HandlerContext, HandlerFuture, MessageRegistry, PendingResult};

// Server types
pub use server::{BroadcastReport, ClientSet, Hub, ServerBroadcaster};

// Session types
pub use session::{ConnectionSession, EpochClock};

// Transport types
pub use transport::{
    CloseReason, Connection, ConnectionHandle, Connector, KeepAlive, MemoryConnector,
    TransportEvent, WebSocketConnector, WebSocketListener,
};
