//! Named message type and the hub's wire-level method names.
//!
//! # Format
//!
//! ```json
//! { "name": "ReceiveMessage", "payload": "Server message at 2024-01-01 12:00:00" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Method Names
// ============================================================================

/// Server → client push. Payload is a string.
pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";

/// Client → server reply. Payload is a string.
pub const RECEIVE_RESULT: &str = "ReceiveResult";

// ============================================================================
// Message
// ============================================================================

/// A named message with a JSON payload.
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    name: String,
    #[serde(default)]
    payload: Value,
}

impl Message {
    /// Creates a new message.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Creates a `ReceiveMessage` push.
    #[inline]
    #[must_use]
    pub fn receive_message(message: impl Into<String>) -> Self {
        Self::new(RECEIVE_MESSAGE, Value::String(message.into()))
    }

    /// Creates a `ReceiveResult` reply.
    #[inline]
    #[must_use]
    pub fn receive_result(result: impl Into<String>) -> Self {
        Self::new(RECEIVE_RESULT, Value::String(result.into()))
    }

    /// Returns the message name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the payload.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Returns the payload as a string, if it is one.
    #[inline]
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        self.payload.as_str()
    }

    /// Consumes the message, returning name and payload.
    #[inline]
    #[must_use]
    pub fn into_parts(self) -> (String, Value) {
        (self.name, self.payload)
    }

    /// Short hex digest of the payload for log correlation.
    #[must_use]
    pub fn digest(&self) -> String {
        payload_digest(&self.payload)
    }
}

/// Hex digest of a JSON payload.
#[must_use]
pub fn payload_digest(payload: &Value) -> String {
    let mut hasher = FxHasher::default();
    payload.to_string().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

// ============================================================================
// Tests
// ============================================================================
