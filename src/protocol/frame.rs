//! Wire frames exchanged over a WebSocket connection.
//!
//! Every text frame carries exactly one JSON object tagged by `type`:
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `handshake` | Client → Server | Protocol negotiation |
//! | `handshakeAck` | Server → Client | Accepts, assigns connection id |
//! | `handshakeRejected` | Server → Client | Refuses negotiation |
//! | `invocation` | Both | Carries a [`Message`] |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

use super::Message;

// ============================================================================
// Constants
// ============================================================================

/// Protocol name negotiated in the handshake.
pub const PROTOCOL_NAME: &str = "json";

/// Protocol version negotiated in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

// ============================================================================
// Frame
// ============================================================================

/// A single wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    /// Opening request from the client.
    Handshake {
        /// Payload protocol name.
        protocol: String,
        /// Payload protocol version.
        version: u32,
    },

    /// Server accepted the handshake.
    HandshakeAck {
        /// Identity assigned to this connection.
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },

    /// Server refused the handshake.
    HandshakeRejected {
        /// Reason for refusal.
        error: String,
    },

    /// A named message.
    Invocation(Message),
}

impl Frame {
    /// Creates the client handshake for the supported protocol.
    #[inline]
    #[must_use]
    pub fn handshake() -> Self {
        Self::Handshake {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION,
        }
    }

    /// Serializes the frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a frame from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the text is not a valid frame.
    pub fn from_text(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::protocol(format!("Malformed frame: {e}")))
    }

    /// Validates a client handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] if this is not a handshake for the
    /// supported protocol and version.
    pub fn validate_handshake(&self) -> Result<()> {
        match self {
            Self::Handshake { protocol, version }
                if protocol == PROTOCOL_NAME && *version == PROTOCOL_VERSION =>
            {
                Ok(())
            }
            Self::Handshake { protocol, version } => Err(Error::handshake(format!(
                "Unsupported protocol {protocol} v{version}"
            ))),
            other => Err(Error::handshake(format!(
                "Expected handshake, got {other:?}"
            ))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Value, json};

    #[test]
    fn test_invocation_wire_shape() {
        let frame = Frame::Invocation(Message::receive_message("hello"));
        let value: Value = serde_json::from_str(&frame.to_text().expect("serialize"))
            .expect("valid json");
        assert_eq!(
            value,
            json!({ "type": "invocation", "name": "ReceiveMessage", "payload": "hello" })
        );
    }

    #[test]
    fn test_handshake_ack_wire_shape() {
        let id = ConnectionId::generate();
        let text = Frame::HandshakeAck { connection_id: id }
            .to_text()
            .expect("serialize");
        assert_eq!(
            text,
            format!(r#"{{"type":"handshakeAck","connectionId":"{id}"}}"#)
        );
    }

    #[test]
    fn test_parse_handshake() {
        let frame = Frame::from_text(r#"{"type":"handshake","protocol":"json","version":1}"#)
            .expect("parse");
        assert_eq!(frame, Frame::handshake());
        assert!(frame.validate_handshake().is_ok());
    }

    #[test]
    fn test_reject_wrong_version() {
        let frame = Frame::Handshake {
            protocol: "json".into(),
            version: 2,
        };
        let err = frame.validate_handshake().unwrap_err();
        assert!(matches!(err, Error::Handshake { .. }));
    }

    #[test]
    fn test_reject_non_handshake() {
        let frame = Frame::Invocation(Message::receive_result("x"));
        assert!(frame.validate_handshake().is_err());
    }

    #[test]
    fn test_malformed_frame() {
        let err = Frame::from_text("{not json").unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }
}
