//! Configuration.
//!
//! [`Settings`] is the flat, serde-friendly form a host application loads
//! from wherever it keeps configuration. It resolves into the typed
//! [`ClientOptions`] and [`ServerOptions`] consumed by the runtime.
//!
//! # Example
//!
//! ```ignore
//! use hubwire::Settings;
//!
//! let settings = Settings::from_json(r#"{ "reconnectDelaySeconds": 2 }"#)?;
//! let client = settings.client_options()?;
//! assert_eq!(client.endpoint.as_str(), "ws://localhost:5051/myHub");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::ReconnectPolicy;
use crate::error::{Error, Result};
use crate::session::DEFAULT_DRAIN_TIMEOUT;
use crate::transport::{DEFAULT_HANDSHAKE_TIMEOUT, KeepAlive};

// ============================================================================
// Constants
// ============================================================================

/// Default hub endpoint dialed by clients.
pub const DEFAULT_ENDPOINT_URL: &str = "ws://localhost:5051/myHub";

/// Default address the hub binds to.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5051";

/// Default path the hub is served on.
pub const DEFAULT_HUB_PATH: &str = "/myHub";

/// Default interval between broadcast ticks.
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(5);

/// Default bound on a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Settings
// ============================================================================

/// Named options as supplied by the host.
///
/// Every field has a default, so a partial document is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Hub URL for clients.
    pub endpoint_url: String,
    /// Delay before the first reconnect attempt.
    pub reconnect_delay_seconds: u64,
    /// Cap on the reconnect delay.
    pub max_reconnect_delay_seconds: u64,
    /// Growth factor per consecutive failure.
    pub reconnect_backoff_multiplier: f64,
    /// Interval between broadcast ticks.
    pub broadcast_interval_seconds: u64,
    /// Address the hub listens on.
    pub bind_address: String,
    /// Path the hub is served on.
    pub hub_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            reconnect_delay_seconds: 5,
            max_reconnect_delay_seconds: 5,
            reconnect_backoff_multiplier: 1.0,
            broadcast_interval_seconds: 5,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            hub_path: DEFAULT_HUB_PATH.to_string(),
        }
    }
}

impl Settings {
    /// Parses settings from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is malformed.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::config(format!("Invalid settings: {e}")))
    }

    /// Resolves the client half.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid endpoint or backoff.
    pub fn client_options(&self) -> Result<ClientOptions> {
        // A cap below the delay means "no growth"; keep the delay
        let delay = Duration::from_secs(self.reconnect_delay_seconds);
        let max_delay = Duration::from_secs(self.max_reconnect_delay_seconds).max(delay);

        let options = ClientOptions::parse(&self.endpoint_url)?.with_reconnect(
            ReconnectPolicy::exponential(delay, max_delay, self.reconnect_backoff_multiplier),
        );

        options.validate()?;
        Ok(options)
    }

    /// Resolves the hub half.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid address, path or interval.
    pub fn server_options(&self) -> Result<ServerOptions> {
        let bind_address: SocketAddr = self.bind_address.parse().map_err(|e| {
            Error::config(format!("Invalid bind address '{}': {e}", self.bind_address))
        })?;

        let options = ServerOptions::new(bind_address)
            .with_hub_path(self.hub_path.clone())
            .with_broadcast_interval(Duration::from_secs(self.broadcast_interval_seconds));

        options.validate()?;
        Ok(options)
    }
}

// ============================================================================
// ClientOptions
// ============================================================================

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Hub URL.
    pub endpoint: Url,
    /// Backoff between attempts.
    pub reconnect: ReconnectPolicy,
    /// Bound on one connect attempt.
    pub connect_timeout: Duration,
    /// Bound on draining handlers when stopping.
    pub drain_timeout: Duration,
}

impl ClientOptions {
    /// Creates options for `endpoint` with default timings.
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Parses `endpoint` and creates options for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is empty or malformed.
    pub fn parse(endpoint: &str) -> Result<Self> {
        if endpoint.trim().is_empty() {
            return Err(Error::config("Endpoint URL must not be empty"));
        }

        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::config(format!("Invalid endpoint URL '{endpoint}': {e}")))?;

        Ok(Self::new(endpoint))
    }

    /// Sets the reconnect policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Sets the drain timeout.
    #[inline]
    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.endpoint.scheme(), "ws" | "wss" | "memory") {
            return Err(Error::config(format!(
                "Unsupported endpoint scheme '{}'",
                self.endpoint.scheme()
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("Connect timeout must be > 0"));
        }
        self.reconnect.validate()
    }
}

// ============================================================================
// ServerOptions
// ============================================================================

/// Resolved hub configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerOptions {
    /// Address to listen on.
    pub bind_address: SocketAddr,
    /// Path the hub is served on.
    pub hub_path: String,
    /// Interval between broadcast ticks.
    pub broadcast_interval: Duration,
    /// Bound on the client's handshake.
    pub handshake_timeout: Duration,
    /// Ping interval and idle timeout for accepted connections.
    pub keep_alive: KeepAlive,
}

impl ServerOptions {
    /// Creates options listening on `bind_address` with defaults elsewhere.
    #[must_use]
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            hub_path: DEFAULT_HUB_PATH.to_string(),
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            keep_alive: KeepAlive::default(),
        }
    }

    /// Sets the hub path.
    #[inline]
    #[must_use]
    pub fn with_hub_path(mut self, hub_path: impl Into<String>) -> Self {
        self.hub_path = hub_path.into();
        self
    }

    /// Sets the broadcast interval.
    #[inline]
    #[must_use]
    pub fn with_broadcast_interval(mut self, broadcast_interval: Duration) -> Self {
        self.broadcast_interval = broadcast_interval;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Sets keep-alive behavior.
    #[inline]
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if !self.hub_path.starts_with('/') {
            return Err(Error::config(format!(
                "Hub path '{}' must start with '/'",
                self.hub_path
            )));
        }
        if self.broadcast_interval.is_zero() {
            return Err(Error::config("Broadcast interval must be > 0"));
        }
        if self.keep_alive.interval.is_zero() || self.keep_alive.idle_timeout.is_zero() {
            return Err(Error::config("Keep-alive timings must be > 0"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
