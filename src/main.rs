//! Packet Ack Server
//!
//! WebSocket server that greets every client, acknowledges each inbound
//! packet by echoing its `packet_id`, and reports malformed input back to the
//! sender.

mod config;
mod server;

use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::{Overrides, RuntimeMode, Settings};
use server::{ServerConfig, WebSocketServer};

/// Packet Ack Server
///
/// Acknowledges JSON packets received over WebSocket
#[derive(Parser, Debug)]
#[command(name = "packet-ack-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on [default: 8080]
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "BIND")]
    bind: Option<String>,

    /// Deployment mode [default: development]
    #[arg(long, env = "APP_ENV", value_enum, ignore_case = true)]
    mode: Option<RuntimeMode>,

    /// PEM encoded PKCS#8 private key (production only)
    #[arg(long, env = "SSL_KEY")]
    ssl_key: Option<PathBuf>,

    /// PEM encoded certificate chain (production only)
    #[arg(long, env = "SSL_CERT")]
    ssl_cert: Option<PathBuf>,

    /// Largest accepted inbound message in bytes
    #[arg(long)]
    max_message_size: Option<usize>,

    /// Seconds to wait for open connections on shutdown
    #[arg(long)]
    shutdown_timeout: Option<u64>,

    /// TOML file with server settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            bind: self.bind.clone(),
            port: self.port,
            mode: self.mode,
            ssl_key: self.ssl_key.clone(),
            ssl_cert: self.ssl_cert.clone(),
            max_message_size: self.max_message_size,
            shutdown_timeout_secs: self.shutdown_timeout,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_filter = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Packet Ack Server v{}", env!("CARGO_PKG_VERSION"));

    let settings = match &args.config {
        Some(path) => {
            info!("Loading settings from {}", path.display());
            Settings::load(path)?
        }
        None => Settings::default(),
    }
    .with_overrides(args.overrides());

    if settings.mode == RuntimeMode::Production && settings.tls_paths().is_none() {
        info!("Running in production mode without SSL certificates");
        info!("Expecting an upstream proxy to terminate TLS");
    }

    // Bind before installing the signal handler so startup failures exit early
    let server = WebSocketServer::bind(ServerConfig::from(&settings)).await?;
    let shutdown = server.shutdown_handle();
    let status = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutting down WebSocket server...");
        shutdown.shutdown();
    });

    if let Err(e) = server.run().await {
        warn!("Server stopped with error: {:#}", e);
        return Err(e);
    }

    info!("Server shutdown complete ({:?})", status.state());
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
