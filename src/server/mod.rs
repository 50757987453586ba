//! Server side: the hub, its client set and the broadcaster.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `broadcaster` | Timed and on-demand pushes |
//! | `clients` | Concurrency-safe set of connected clients |
//! | `hub` | Accept loop and per-client sessions |

// ============================================================================
// Submodules
// ============================================================================

/// Timed and on-demand pushes.
pub mod broadcaster;

/// Set of connected clients.
pub mod clients;

/// Accept loop and per-client sessions.
pub mod hub;

// ============================================================================
// Re-exports
// ============================================================================

pub use broadcaster::{MessageFactory, ServerBroadcaster, server_time_message};
pub use clients::{BroadcastReport, ClientSet};
pub use hub::Hub;
