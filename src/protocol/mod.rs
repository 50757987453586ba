//! Wire protocol types.
//!
//! This module defines the messages exchanged between hub and clients.
//!
//! # Protocol Overview
//!
//! | Method | Direction | Payload |
//! |--------|-----------|---------|
//! | `ReceiveMessage` | Server → Client | `string` |
//! | `ReceiveResult` | Client → Server | `string` |
//!
//! Each WebSocket text frame holds one [`Frame`]. The first exchange on a
//! connection is the handshake; everything after is `invocation` frames.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Handshake and invocation frames |
//! | `message` | Named message and method-name constants |

// ============================================================================
// Submodules
// ============================================================================

/// Handshake and invocation frames.
pub mod frame;

/// Named message type.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{Frame, PROTOCOL_NAME, PROTOCOL_VERSION};
pub use message::{Message, RECEIVE_MESSAGE, RECEIVE_RESULT, payload_digest};
