//! WebSocket server implementation
//!
//! Provides a WebSocket server that owns its listening socket, upgrades each
//! accepted connection on its own task and shuts down gracefully.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_native_tls::TlsAcceptor;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::handler::ConnectionHandler;
use super::tls;
use crate::config::{
    Settings, TlsPaths, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};

/// Process-wide lifecycle of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Accepting and serving connections
    Running,
    /// No longer accepting; open connections are being closed
    Stopping,
    /// All connections are gone
    Stopped,
}

/// Resolve once the server has left the running state
pub async fn wait_for_stop(state_rx: &mut watch::Receiver<ServerState>) {
    let _ = state_rx
        .wait_for(|state| *state != ServerState::Running)
        .await;
}

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// TLS material, when the server terminates TLS itself
    pub tls: Option<TlsPaths>,
    /// Largest accepted inbound message, in bytes
    pub max_message_size: usize,
    /// How long open connections get to close on shutdown
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind: impl Into<String>, port: u16) -> Self {
        Self {
            bind: bind.into(),
            port,
            tls: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }

    /// Set the TLS material
    pub fn with_tls(mut self, tls: Option<TlsPaths>) -> Self {
        self.tls = tls;
        self
    }

    /// Set the inbound message size limit
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the shutdown grace period
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// URL scheme clients should use
    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() {
            "wss"
        } else {
            "ws"
        }
    }
}

impl From<&Settings> for ServerConfig {
    fn from(settings: &Settings) -> Self {
        ServerConfig::new(settings.bind.clone(), settings.port)
            .with_tls(settings.tls_paths())
            .with_max_message_size(settings.max_message_size)
            .with_shutdown_timeout(settings.shutdown_timeout())
    }
}

/// Requests shutdown of a running server and observes its state
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    state_tx: Arc<watch::Sender<ServerState>>,
}

impl ShutdownHandle {
    /// Trigger server shutdown
    ///
    /// Has no effect once the server is already stopping.
    pub fn shutdown(&self) {
        self.state_tx.send_if_modified(|state| {
            if *state == ServerState::Running {
                *state = ServerState::Stopping;
                true
            } else {
                false
            }
        });
    }

    /// Current server state
    pub fn state(&self) -> ServerState {
        *self.state_tx.borrow()
    }
}

/// WebSocket server owning the listening socket
pub struct WebSocketServer {
    config: ServerConfig,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    state_tx: Arc<watch::Sender<ServerState>>,
}

impl WebSocketServer {
    /// Bind the listening socket and prepare TLS
    ///
    /// Fails if the address cannot be bound or the TLS material is unusable.
    pub async fn bind(config: ServerConfig) -> anyhow::Result<Self> {
        let tls = match &config.tls {
            Some(paths) => Some(tls::load_acceptor(paths)?),
            None => None,
        };

        let addr = config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        let (state_tx, _) = watch::channel(ServerState::Running);

        Ok(Self {
            config,
            listener,
            tls,
            state_tx: Arc::new(state_tx),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get a handle for stopping the server
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            state_tx: Arc::clone(&self.state_tx),
        }
    }

    /// Run the WebSocket server
    ///
    /// Accepts connections until shutdown is requested, then waits for open
    /// connections to close for up to the configured grace period.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.local_addr()?;
        info!(
            "WebSocket server listening on {}://{}",
            self.config.scheme(),
            addr
        );

        let mut state_rx = self.state_tx.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let span = info_span!("connection", id = %Uuid::new_v4(), peer = %peer_addr);
                            let tls = self.tls.clone();
                            let state_rx = self.state_tx.subscribe();
                            let max_message_size = self.config.max_message_size;

                            connections.spawn(
                                async move {
                                    if let Err(e) = handle_connection(stream, tls, max_message_size, state_rx).await {
                                        error!("Connection error: {:#}", e);
                                    }
                                    info!("Connection released");
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                Some(joined) = connections.join_next() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                }
                _ = wait_for_stop(&mut state_rx) => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        // Stop accepting before draining
        drop(self.listener);

        if !connections.is_empty() {
            info!("Waiting for {} active connections to close...", connections.len());
            let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
                while connections.join_next().await.is_some() {}
            })
            .await;

            if drained.is_err() {
                warn!(
                    "Grace period elapsed, aborting {} connections",
                    connections.len()
                );
                connections.shutdown().await;
            }
        }

        self.state_tx.send_replace(ServerState::Stopped);
        info!("WebSocket server closed");
        Ok(())
    }
}

/// Upgrade an accepted TCP stream and serve it
async fn handle_connection(
    stream: TcpStream,
    tls: Option<TlsAcceptor>,
    max_message_size: usize,
    state_rx: watch::Receiver<ServerState>,
) -> anyhow::Result<()> {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(max_message_size);

    match tls {
        Some(acceptor) => {
            let stream = acceptor.accept(stream).await.context("TLS handshake failed")?;
            let ws = accept_async_with_config(stream, Some(ws_config)).await?;
            ConnectionHandler::new(ws, state_rx).run().await
        }
        None => {
            let ws = accept_async_with_config(stream, Some(ws_config)).await?;
            ConnectionHandler::new(ws, state_rx).run().await
        }
    }
}
