//! Hub demo: pushes a server-time message to every client every few seconds
//! and logs the results clients send back.
//!
//! Usage:
//!   cargo run --example server
//!   cargo run --example server -- --debug
//!   cargo run --example server -- --config settings.json

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use common::Args;
use hubwire::{Hub, MessageRegistry, RECEIVE_RESULT, ServerBroadcaster, WebSocketListener};
use tokio_util::sync::CancellationToken;
use tracing::info;

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
    println!("=== Hub Server ===\n");

    let options = args.settings()?.server_options()?;

    // ========================================================================
    // Handlers
    // ========================================================================

    let registry = Arc::new(MessageRegistry::new());
    registry.on_notification(RECEIVE_RESULT, |result: String, ctx| async move {
        info!(epoch = %ctx.epoch(), %result, "Received result from client");
        Ok(())
    });

    // ========================================================================
    // Hub + Broadcaster
    // ========================================================================

    let shutdown = CancellationToken::new();
    let hub = Hub::new(registry).with_shutdown_token(&shutdown);

    let listener = WebSocketListener::from_options(&options).await?;
    println!("[Hub] Listening on {}", listener.ws_url());

    let broadcaster = ServerBroadcaster::new(Arc::clone(hub.clients()), options.broadcast_interval);

    let serving = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.serve(listener).await })
    };

    let broadcasting = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { broadcaster.run(shutdown).await })
    };

    common::wait_for_exit().await;

    // ========================================================================
    // Shutdown
    // ========================================================================

    println!("\n[Hub] Shutting down...");
    shutdown.cancel();
    hub.shutdown().await;

    let (served, broadcast) = tokio::join!(serving, broadcasting);
    served?;
    broadcast?;

    println!("[Hub] Stopped");
    Ok(())
}
