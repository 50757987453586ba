//! Client side: lifecycle states, backoff and the connection manager.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `backoff` | Delay schedule between attempts |
//! | `manager` | Reconnect state machine |
//! | `state` | `SessionState` and `StateChange` |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnect backoff policy.
pub mod backoff;

/// Reconnect state machine.
pub mod manager;

/// Lifecycle states.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::{DEFAULT_RECONNECT_DELAY, ReconnectPolicy};
pub use manager::ConnectionManager;
pub use state::{SessionState, StateChange};
