//! Client demo: answers every pushed message with its upper-cased text
//! after a one second cancellable delay, reconnecting whenever the hub
//! goes away.
//!
//! Usage:
//!   cargo run --example client
//!   cargo run --example client -- --debug
//!   cargo run --example client -- --config settings.json

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use common::Args;
use hubwire::{
    ConnectionManager, Error, MessageRegistry, RECEIVE_MESSAGE, WebSocketConnector,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

// ============================================================================
// Constants
// ============================================================================

/// Simulated work per message.
const WORK_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    println!("=== Hub Client ===\n");

    let options = args.settings()?.client_options()?;
    println!("[Client] Endpoint: {}", options.endpoint);

    // ========================================================================
    // Handlers
    // ========================================================================

    let registry = Arc::new(MessageRegistry::new());
    registry.on(RECEIVE_MESSAGE, |message: String, ctx| async move {
        info!(epoch = %ctx.epoch(), %message, "Processing message");
        ctx.sleep(WORK_DELAY).await?;
        Ok::<_, Error>(message.to_uppercase())
    });

    // ========================================================================
    // Connection Manager
    // ========================================================================

    let manager = ConnectionManager::new(options, Arc::new(WebSocketConnector::new()), registry);

    let mut changes = manager.subscribe();
    let watcher = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => println!("[Client] {} (epoch {})", change.state, change.epoch),
                Err(RecvError::Lagged(skipped)) => println!("[Client] ({skipped} changes skipped)"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    manager.start()?;

    common::wait_for_exit().await;

    // ========================================================================
    // Shutdown
    // ========================================================================

    println!("\n[Client] Stopping...");
    manager.stop().await;
    drop(manager);
    watcher.await?;

    println!("[Client] Stopped");
    Ok(())
}
