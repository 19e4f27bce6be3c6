//! # relayd
//!
//! Workflow event relay binary: wires configuration, logging, and
//! metrics together and starts the HTTP/WebSocket server.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use relay_server::config::ServerConfig;
use relay_server::metrics::install_recorder;
use relay_server::server::RelayServer;

/// Workflow event relay server.
#[derive(Parser, Debug)]
#[command(name = "relayd", about = "Workflow event relay server")]
struct Cli {
    /// Host to bind (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum concurrent subscribers (overrides config).
    #[arg(long)]
    max_connections: Option<usize>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Cli) -> Result<ServerConfig> {
    let mut config = ServerConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(ref host) = args.host {
        config.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging();

    let config = load_config(&args)?;
    let metrics_handle = install_recorder();

    let server = RelayServer::new(config, Some(metrics_handle));
    let (addr, handle) = server.listen().await.context("failed to bind server")?;
    tracing::info!("relay listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    server
        .shutdown()
        .graceful_shutdown(Some(server.config().shutdown_timeout()))
        .await;
    server.registry().clear().await;
    let _ = handle.await;

    tracing::info!("shutdown complete");
    Ok(())
}
