//! PyBridge control-channel server: headless entry point.
//!
//! Runs the bridge without an embedding host application. No execution engine
//! is attached in this mode, so handshakes report `python_ready = false` and
//! every engine-backed command fails cleanly; the framing, handshake, and
//! admission behavior are exactly those of the embedded bridge, which makes
//! this binary useful for client development and protocol testing.
//!
//! # Usage
//!
//! ```text
//! pybridge-server [OPTIONS]
//!
//! Options:
//!   --host <HOST>          Listen host: 'localhost' or a literal IP [default: 127.0.0.1]
//!   --port <PORT>          Control channel TCP port [default: 9877]
//!   --auth-token <TOKEN>   Shared-secret token (required for non-loopback hosts)
//! ```
//!
//! Each option can also come from the environment (`PYBRIDGE_HOST`,
//! `PYBRIDGE_PORT`, `PYBRIDGE_AUTH_TOKEN`); CLI arguments take precedence.
//! Log verbosity follows `RUST_LOG`.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pybridge_server::application::engine::DetachedEngine;
use pybridge_server::domain::config::ServerConfig;
use pybridge_server::domain::events::BridgeEvent;
use pybridge_server::infrastructure::bridge::Bridge;

/// PyBridge control-channel server.
#[derive(Debug, Parser)]
#[command(
    name = "pybridge-server",
    about = "Single-client control channel for an embedded Python execution engine",
    version
)]
struct Cli {
    /// Listen host: `localhost` or a literal IP address.
    #[arg(long, default_value = "127.0.0.1", env = "PYBRIDGE_HOST")]
    host: String,

    /// TCP port for the control channel listener.
    #[arg(long, default_value_t = pybridge_core::DEFAULT_PORT, env = "PYBRIDGE_PORT")]
    port: u16,

    /// Shared-secret token clients must present in the handshake. Required
    /// when binding a non-loopback host.
    #[arg(long, default_value = "", env = "PYBRIDGE_AUTH_TOKEN")]
    auth_token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        auth_token: cli.auth_token,
    };

    let (bridge, handle, mut events) = Bridge::new(Box::new(DetachedEngine));
    let bridge_task = tokio::spawn(bridge.run());

    // Forward operator events to the log; there is no console in this mode.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                BridgeEvent::StatusChanged(status) => info!("status: {status}"),
                BridgeEvent::LogChanged(message) => info!("{message}"),
                BridgeEvent::HistoryChanged(history) => info!("history updated: {history}"),
            }
        }
    });

    handle
        .start(config)
        .await
        .context("failed to start the bridge")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;
    info!("shutdown signal received");

    handle.stop().await;
    drop(handle);
    let _ = bridge_task.await;
    Ok(())
}
