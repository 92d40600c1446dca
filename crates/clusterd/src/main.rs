//! # clusterd - fleet cluster coordinator
//!
//! Keeps a fleet of manager nodes aware of each other. Answers encrypted
//! peer RPCs, elects the active master, and reports node and file-sync
//! status over HTTP.
//!
//! ## Architecture
//! ```text
//! peer nodes ──(encrypted RPC)──→ clusterd ←── HTTP status API
//!                                    ↓
//!                         coordination store (Unix socket)
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cluster;
mod config;
mod routes;
mod state;

use cluster::{PidFile, RpcServer, coordination_worker};
use config::AppConfig;
use state::AppState;

/// clusterd - fleet cluster coordinator
#[derive(Parser, Debug)]
#[command(name = "clusterd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/clusterd.toml")]
    config: String,

    /// HTTP listen address (overrides config)
    #[arg(short, long, env = "CLUSTERD_LISTEN_ADDR")]
    listen: Option<String>,

    /// Peer RPC listen address (overrides config)
    #[arg(long, env = "CLUSTERD_RPC_LISTEN_ADDR")]
    rpc_listen: Option<String>,

    /// Coordination store socket (overrides config)
    #[arg(long, env = "CLUSTERD_STORE_SOCKET")]
    store_socket: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting clusterd v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!("Configuration loaded from {}", args.config);

    // Validate cluster section and build the coordinator
    let state = AppState::new(config.clone()).await?;

    let pid_file = PidFile::create(&config.run_dir).context("Failed to write pid file")?;
    info!(path = %pid_file.path().display(), "Pid file written");

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    match &state.coordinator {
        Some(coordinator) => {
            let server = RpcServer::bind(
                &config.rpc_listen_addr,
                coordinator.discovery().clone(),
                coordinator.store().clone(),
            )
            .await
            .with_context(|| format!("Failed to bind cluster RPC on {}", config.rpc_listen_addr))?;

            let rpc_shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                if let Err(e) = server.run(rpc_shutdown).await {
                    tracing::error!(error = %e, "Cluster RPC listener failed");
                }
            });

            tokio::spawn(coordination_worker(coordinator.clone(), shutdown_tx.subscribe()));

            let cluster = coordinator.discovery().config();
            info!(
                node = %cluster.node_name,
                node_type = %cluster.node_type,
                cluster = %cluster.name,
                nodes = cluster.nodes.len(),
                "Cluster enabled"
            );
        }
        None => info!("Cluster disabled, serving status only"),
    }

    // Build router
    let app = routes::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("clusterd listening on {}", config.listen_addr);

    // Handle graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    drop(pid_file);
    info!("clusterd shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
