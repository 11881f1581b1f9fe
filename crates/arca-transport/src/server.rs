//! TCP transport server.
//!
//! Binds the listening socket, accepts connections, registers each one and
//! spawns its session. Broadcasting goes through the shared
//! [`ConnectionRegistry`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arca_protocol::{Request, Response};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::connections::ConnectionRegistry;
use crate::error::TransportError;
use crate::session;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Trait implemented by the router to handle decoded requests.
/// Sessions call this once per frame; `None` means no reply is written.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle_request(&self, request: Request) -> Option<Response>;
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port` to bind (port 0 for OS-assigned)
    pub address: String,
    /// Longest accepted line, excluding the terminator
    pub max_frame_bytes: usize,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7070".into(),
            max_frame_bytes: 1024 * 1024,
            max_connections: None,
        }
    }
}

impl ServerConfig {
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

/// The transport server. Owns the accept loop and the connection registry.
pub struct TransportServer {
    /// Live connections
    connections: Arc<ConnectionRegistry>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Accept loop task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound address
    local_addr: SocketAddr,
}

impl TransportServer {
    /// Bind `config.address` and start accepting connections.
    ///
    /// Binding is the only fallible step; an address already in use is
    /// reported here and leaves any existing listener untouched.
    pub async fn start<H: RequestHandler>(
        config: ServerConfig,
        handler: Arc<H>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(&config.address)
            .await
            .map_err(|source| TransportError::Bind {
                address: config.address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(TransportError::LocalAddr)?;

        info!("Arca transport listening on {local_addr}");

        let connections = Arc::new(ConnectionRegistry::new());
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(accept_loop(
            listener,
            handler,
            Arc::clone(&connections),
            config,
            shutdown_rx,
        ));

        Ok(Self {
            connections,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            local_addr,
        })
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Write an encoded frame to every live connection.
    pub async fn broadcast(&self, frame: &[u8]) -> usize {
        self.connections.broadcast(frame).await
    }

    /// Stop accepting and close the listening socket.
    ///
    /// Open sessions are left alone; each ends when its peer goes away.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Arca transport on {} stopped", self.local_addr);
    }
}

async fn accept_loop<H: RequestHandler>(
    listener: TcpListener,
    handler: Arc<H>,
    connections: Arc<ConnectionRegistry>,
    config: ServerConfig,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if let Some(max) = config.max_connections {
                            if connections.len() >= max {
                                warn!("Connection from {peer} rejected: max connections reached ({max})");
                                continue;
                            }
                        }

                        let (reader, writer) = stream.into_split();
                        let conn = connections.register(peer, writer);
                        info!("Client connected: {} from {peer} (total: {})", conn.id, connections.len());

                        tokio::spawn(session::run(
                            conn,
                            reader,
                            Arc::clone(&handler),
                            Arc::clone(&connections),
                            config.max_frame_bytes,
                        ));
                    }
                    Err(e) => {
                        error!("Accept failed: {e}");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }

            // Also fires when the sender is dropped
            _ = shutdown_rx.recv() => break,
        }
    }
}
