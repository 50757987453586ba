//! Error types for hubwire.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use hubwire::{ClientOptions, Result};
//!
//! fn options() -> Result<ClientOptions> {
//!     let options = ClientOptions::parse("ws://localhost:5051/myHub")?;
//!     options.validate()?;
//!     Ok(options)
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | Recovery |
//! |----------|----------|----------|
//! | Configuration | [`Error::Config`] | Fatal at startup |
//! | Connection | [`Error::Connect`], [`Error::ConnectTimeout`], [`Error::Handshake`], [`Error::TransportClosed`] | Backoff + retry |
//! | Dispatch | [`Error::UnknownMessage`], [`Error::HandlerFailure`], [`Error::Cancelled`] | Logged, message dropped |
//! | Outbound | [`Error::SendFailure`] | Logged, suppressed |
//! | Lifecycle | [`Error::AlreadyStarted`], [`Error::Stopped`] | Caller misuse |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] | Depends on context |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when options are missing or malformed. The core refuses
    /// to run with a broken configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection attempt failed.
    #[error("Failed to connect to {endpoint}: {message}")]
    Connect {
        /// Endpoint that was dialed.
        endpoint: String,
        /// Description of the failure.
        message: String,
    },

    /// Connection attempt did not complete in time.
    #[error("Connect timeout after {timeout_ms}ms")]
    ConnectTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Handshake was rejected or malformed.
    #[error("Handshake failed: {message}")]
    Handshake {
        /// Description of the handshake failure.
        message: String,
    },

    /// The duplex channel has ended.
    #[error("Transport closed")]
    TransportClosed,

    // ========================================================================
    // Dispatch Errors
    // ========================================================================
    /// No handler registered for an inbound message name.
    #[error("Unknown message: {name}")]
    UnknownMessage {
        /// The unregistered message name.
        name: String,
    },

    /// A registered handler failed while processing a message.
    #[error("Handler for {name} failed: {message}")]
    HandlerFailure {
        /// Message name the handler was registered under.
        name: String,
        /// Description of the failure.
        message: String,
    },

    /// A cooperative wait point observed cancellation.
    #[error("Operation cancelled")]
    Cancelled,

    // ========================================================================
    // Outbound Errors
    // ========================================================================
    /// Outbound send failed.
    #[error("Failed to send {name}: {message}")]
    SendFailure {
        /// Name of the message that could not be sent.
        name: String,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// `start()` called on a manager that is already running.
    #[error("Connection manager already started")]
    AlreadyStarted,

    /// Operation attempted on a manager that has been stopped.
    #[error("Connection manager stopped")]
    Stopped,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Unexpected frame or protocol violation.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connect error.
    #[inline]
    pub fn connect(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a connect timeout error.
    #[inline]
    pub fn connect_timeout(timeout_ms: u64) -> Self {
        Self::ConnectTimeout { timeout_ms }
    }

    /// Creates a handshake error.
    #[inline]
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Creates an unknown message error.
    #[inline]
    pub fn unknown_message(name: impl Into<String>) -> Self {
        Self::UnknownMessage { name: name.into() }
    }

    /// Creates a handler failure.
    #[inline]
    pub fn handler(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerFailure {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a send failure.
    #[inline]
    pub fn send_failure(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SendFailure {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::ConnectTimeout { .. }
                | Self::Handshake { .. }
                | Self::TransportClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recovered locally.
    ///
    /// Only configuration and lifecycle misuse are not.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Config { .. } | Self::AlreadyStarted | Self::Stopped
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connect("ws://localhost:5051/myHub", "refused");
        assert_eq!(
            err.to_string(),
            "Failed to connect to ws://localhost:5051/myHub: refused"
        );
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("endpoint url is required");
        assert_eq!(
            err.to_string(),
            "Configuration error: endpoint url is required"
        );
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::connect_timeout(5000).is_timeout());
        assert!(!Error::TransportClosed.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connect("x", "y").is_connection_error());
        assert!(Error::connect_timeout(1).is_connection_error());
        assert!(Error::handshake("bad").is_connection_error());
        assert!(Error::TransportClosed.is_connection_error());
        assert!(!Error::unknown_message("Nope").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::TransportClosed.is_recoverable());
        assert!(Error::handler("ReceiveMessage", "boom").is_recoverable());
        assert!(Error::send_failure("ReceiveResult", "closed").is_recoverable());
        assert!(!Error::config("missing").is_recoverable());
        assert!(!Error::Stopped.is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
