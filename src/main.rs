//! Echo terminal server binary.
//!
//! Binds the configured address, upgrades connections to websocket
//! sessions, and echoes every inbound payload back to the peer. Runs until
//! SIGINT/SIGTERM, then drains all sessions gracefully.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use termws::config::{load_config, ServerConfig};
use termws::lifecycle::signals;
use termws::observability::{logging, metrics};
use termws::{Server, Session};

#[derive(Debug, Parser)]
#[command(name = "termws", about = "WebSocket terminal echo server")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the configured bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.listener.host = host;
    }
    if let Some(port) = args.port {
        config.listener.port = port;
    }

    logging::init_logging(&config.observability.log_filter);

    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        max_sessions = config.listener.max_sessions,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = Arc::new(Server::new(config));
    let addr = server.start(echo_handler).await?;
    tracing::info!(address = %addr, "Terminal server listening");

    signals::shutdown_signal().await;

    if let Err(e) = server.stop().await {
        tracing::error!(error = %e, "Shutdown finished with errors");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Echo every inbound payload back to the peer until the session closes.
fn echo_handler(mut session: Session) {
    tokio::spawn(async move {
        tracing::info!(
            session = %session.id(),
            peer_addr = %session.peer_addr(),
            "Session attached"
        );
        while let Some(chunk) = session.recv().await {
            if session.write(chunk).await.is_err() {
                break;
            }
        }
    });
}
