//! Transport layer.
//!
//! This module provides the duplex channel between a hub and its clients.
//! The rest of the crate only sees [`Connector`], [`Connection`],
//! [`ConnectionHandle`] and [`TransportEvent`]; WebSocket and in-memory
//! transports plug in underneath.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                          ┌──────────────────────┐
//! │  Client              │                          │  Hub                 │
//! │                      │        WebSocket         │                      │
//! │  WebSocketConnector  │◄────────────────────────►│  WebSocketListener   │
//! │  → Connection        │   ws://host:5051/myHub   │  → Connection        │
//! │                      │                          │                      │
//! └──────────────────────┘                          └──────────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connector::connect` - Dial, handshake, spawn event loop
//! 2. `Connection::recv` - Inbound `Message` events, then one `Closed`
//! 3. `ConnectionHandle::send` - Outbound sends from any task
//! 4. `ConnectionHandle::close` - Graceful close
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | WebSocket connector |
//! | `connection` | Handles, events and the WebSocket event loop |
//! | `memory` | In-process connection pairs |
//! | `server` | WebSocket listener and handshake |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connector for clients.
pub mod client;

/// Connection handles and the WebSocket event loop.
pub mod connection;

/// In-process connection pairs.
pub mod memory;

/// WebSocket listener for the hub.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{DEFAULT_HANDSHAKE_TIMEOUT, WebSocketConnector};
pub use connection::{
    CloseReason, Connection, ConnectionHandle, Connector, KeepAlive, TransportEvent,
};
pub use memory::{MemoryConnector, MemoryListener, pair};
pub use server::WebSocketListener;
