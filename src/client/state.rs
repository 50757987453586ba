//! Connection lifecycle states.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::identifiers::Epoch;

// ============================================================================
// SessionState
// ============================================================================

/// Lifecycle state of a [`ConnectionManager`](super::ConnectionManager).
///
/// ```text
/// Disconnected --start--> Connecting --ok--> Connected
///                           │  ▲               │
///                      fail │  │ backoff       │ closed
///                           ▼  │               ▼
///                         Reconnecting ◄───────┘
///
/// Connecting | Connected | Reconnecting --stop--> ShuttingDown --> Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Not running. Initial and terminal state.
    #[default]
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// A transport is live and messages are dispatched.
    Connected,
    /// Waiting out the backoff before the next attempt.
    Reconnecting,
    /// Stop requested; releasing the transport and handlers.
    ShuttingDown,
}

impl SessionState {
    /// Returns `true` while the manager is running and not stopping.
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::ShuttingDown => "shutting-down",
        };
        f.write_str(name)
    }
}

// ============================================================================
// StateChange
// ============================================================================

/// One lifecycle transition, as published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State entered.
    pub state: SessionState,
    /// Epoch at the time of the transition.
    pub epoch: Epoch,
}

// ============================================================================
// Tests
// ============================================================================
