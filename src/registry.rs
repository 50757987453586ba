//! Message registry: maps message names to handlers.
//!
//! The registry lives for the whole process and is shared by every
//! connection epoch. Registering under an existing name replaces the
//! previous handler (last write wins) and hands the old one back.
//!
//! # Example
//!
//! ```ignore
//! use hubwire::{MessageRegistry, RECEIVE_MESSAGE};
//!
//! let registry = MessageRegistry::new();
//! registry.on(RECEIVE_MESSAGE, |message: String, ctx| async move {
//!     ctx.sleep(std::time::Duration::from_secs(1)).await?;
//!     Ok(message.to_uppercase())
//! });
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::Epoch;
use crate::protocol::payload_digest;

// ============================================================================
// Types
// ============================================================================

/// Future returned by a handler.
///
/// `Some(value)` is sent back as the reply; `None` sends nothing.
pub type HandlerFuture = BoxFuture<'static, Result<Option<Value>>>;

/// A registered message handler.
pub type Handler = Arc<dyn Fn(Value, HandlerContext) -> HandlerFuture + Send + Sync>;

// ============================================================================
// HandlerContext
// ============================================================================

/// Per-invocation context passed to handlers.
///
/// Carries the cancellation token for cooperative wait points. The token
/// is cancelled when the epoch ends or the manager stops.
#[derive(Clone)]
pub struct HandlerContext {
    name: Arc<str>,
    epoch: Epoch,
    cancellation: CancellationToken,
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("name", &self.name)
            .field("epoch", &self.epoch)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

impl HandlerContext {
    /// Creates a context.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, epoch: Epoch, cancellation: CancellationToken) -> Self {
        Self {
            name: name.into(),
            epoch,
            cancellation,
        }
    }

    /// Message name being handled.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Epoch the invocation belongs to.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Cancellation token for long-running waits.
    #[inline]
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns `true` once cancellation was requested.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the token fires before the delay.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            () = self.cancellation.cancelled() => Err(Error::Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

// ============================================================================
// PendingResult
// ============================================================================

/// A handler invocation running on its own task.
///
/// Dropping it before completion aborts the handler.
#[derive(Debug)]
pub struct PendingResult {
    name: String,
    task: JoinHandle<Result<Option<Value>>>,
}

impl PendingResult {
    /// Message name being handled.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the handler to finish.
    ///
    /// # Errors
    ///
    /// The handler's own error, or [`Error::HandlerFailure`] if it panicked.
    pub async fn outcome(mut self) -> Result<Option<Value>> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::Cancelled),
            Err(e) => Err(Error::handler(
                self.name.clone(),
                format!("handler panicked: {e}"),
            )),
        }
    }
}

// Dropping an unfinished invocation aborts it
impl Drop for PendingResult {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// MessageRegistry
// ============================================================================

/// Maps message names to handlers.
///
/// Thread-safe; lookups never hold the lock while a handler runs.
#[derive(Default)]
pub struct MessageRegistry {
    handlers: RwLock<FxHashMap<String, Handler>>,
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl MessageRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a raw JSON handler under `name`.
    ///
    /// Returns the handler it replaced, if any.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F) -> Option<Handler>
    where
        F: Fn(Value, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |payload: Value, ctx: HandlerContext| handler(payload, ctx).boxed());
        self.insert(name.into(), handler)
    }

    /// Registers a typed handler whose return value is sent as the reply.
    ///
    /// A payload that does not deserialize into `T` fails the invocation.
    pub fn on<T, R, F, Fut>(&self, name: impl Into<String>, handler: F) -> Option<Handler>
    where
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(T, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(name, move |payload, ctx| {
            let handler = Arc::clone(&handler);
            async move {
                let input = decode::<T>(ctx.name(), payload)?;
                let reply = handler(input, ctx).await?;
                Ok::<_, Error>(Some(serde_json::to_value(reply)?))
            }
        })
    }

    /// Registers a typed handler that never replies.
    pub fn on_notification<T, F, Fut>(&self, name: impl Into<String>, handler: F) -> Option<Handler>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(name, move |payload, ctx| {
            let handler = Arc::clone(&handler);
            async move {
                let input = decode::<T>(ctx.name(), payload)?;
                handler(input, ctx).await?;
                Ok::<_, Error>(None)
            }
        })
    }

    /// Removes the handler registered under `name`.
    pub fn unregister(&self, name: &str) -> Option<Handler> {
        self.handlers.write().remove(name)
    }

    /// Returns `true` if a handler is registered under `name`.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    /// Returns the number of registered handlers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns `true` if no handler is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Returns the registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Starts the handler registered under `name` on its own task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMessage`] (logged once at warn) if nothing is
    /// registered under `name`.
    pub fn dispatch(
        &self,
        name: &str,
        payload: Value,
        ctx: HandlerContext,
    ) -> Result<PendingResult> {
        let handler = self.handlers.read().get(name).cloned();

        let Some(handler) = handler else {
            warn!(
                name,
                digest = %payload_digest(&payload),
                "No handler registered for message"
            );
            return Err(Error::unknown_message(name));
        };

        debug!(name, epoch = %ctx.epoch(), "Dispatching message");

        let task = tokio::spawn(handler(payload, ctx));

        Ok(PendingResult {
            name: name.to_string(),
            task,
        })
    }

    fn insert(&self, name: String, handler: Handler) -> Option<Handler> {
        let previous = self.handlers.write().insert(name.clone(), handler);

        if previous.is_some() {
            debug!(name, "Handler replaced");
        } else {
            debug!(name, "Handler registered");
        }

        previous
    }
}

/// Deserializes a handler payload.
fn decode<T: DeserializeOwned>(name: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| Error::handler(name, format!("invalid payload: {e}")))
}

// ============================================================================
// Tests
// ============================================================================
