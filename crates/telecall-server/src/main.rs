//! # Telecall Server
//!
//! Runs the reference signaling server: the `/signal` WebSocket, room
//! history over REST and a health check, all on one port.

use clap::Parser;
use std::net::SocketAddr;
use telecall_signal::{SignalState, build_router};

/// Telecall signaling server
#[derive(Parser, Debug)]
#[command(name = "telecall")]
#[command(version)]
#[command(about = "Peer registry, call relay and room chat for Telecall clients", long_about = None)]
struct Args {
    /// Host to bind to (overrides TELECALL__SERVER__HOST)
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on (overrides TELECALL__SERVER__PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = telecall_common::config::init()?;

    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telecall=debug,tower_http=debug".into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("Starting Telecall v{}", env!("CARGO_PKG_VERSION"));

    let host = args.host.as_deref().unwrap_or(&config.server.host);
    let port = args.port.unwrap_or(config.server.port);
    let addr = SocketAddr::new(host.parse()?, port);

    let router = build_router(SignalState::new(config.limits.clone()));

    tracing::info!("Signaling listening on ws://{addr}/signal");
    tracing::info!(
        max_message_length = config.limits.max_message_length,
        max_history = config.limits.max_history,
        "Room limits"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
