//! RpcServer: owns the handler registries and the transport, and exposes
//! the control surface: register, start, close, and notifications.

use std::net::SocketAddr;
use std::sync::Arc;

use arca_protocol::{Base, HandlerResult, Request, Response, RpcError, codec};
use arca_transport::{ServerConfig, TransportError, TransportServer};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;

/// A JSON-RPC server instance. `S` is the store handle passed to target
/// handlers by [`RpcServer::process_notification`].
///
/// Single-use: once started and closed it cannot be started again.
pub struct RpcServer<S = ()> {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher<S>>,
    transport: Option<TransportServer>,
}

impl<S: Send + Sync + 'static> RpcServer<S> {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            dispatcher: Arc::new(Dispatcher::new()),
            transport: None,
        }
    }

    /// Register a handler for client requests. Replaces any handler
    /// already registered for the same (context, method).
    pub fn register_source<H>(&self, method: &str, context: &str, handler: H)
    where
        H: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.dispatcher.registry().register_source(method, context, handler);
    }

    /// Register a handler factory for notifications.
    pub fn register_target<F, H>(&self, method: &str, context: &str, factory: F)
    where
        F: Fn(Arc<S>) -> H + Send + Sync + 'static,
        H: Fn(&Request) -> HandlerResult + 'static,
    {
        self.dispatcher.registry().register_target(method, context, factory);
    }

    /// Bind the configured address and start serving. Returns the bound
    /// address.
    pub async fn start(&mut self) -> Result<SocketAddr, TransportError> {
        if self.transport.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        let transport =
            TransportServer::start(self.config.clone(), Arc::clone(&self.dispatcher)).await?;
        let addr = transport.local_addr();
        self.transport = Some(transport);
        info!("Arca server started on {addr}");
        Ok(addr)
    }

    /// Close the listening socket. Open sessions end on their own as their
    /// peers disconnect.
    pub async fn close(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.stop().await;
        }
    }

    /// Dispatch `request` against the target registry and broadcast the
    /// outcome (response or error) to every connection.
    pub async fn process_notification(&self, request: Request, store: Arc<S>) {
        let Some(response) = self.dispatcher.dispatch_target(&request, store) else {
            return;
        };
        if response.is_error() {
            debug!("Notification {} {} failed; broadcasting error", request.id, request.method);
        }
        self.broadcast_response(&response).await;
    }

    /// Broadcast an error built from `base` to every connection.
    pub async fn broadcast_error(&self, base: Base, error: RpcError) -> usize {
        self.broadcast_response(&Response::failure(base, error)).await
    }

    /// Broadcast a response to every connection. Returns the number of
    /// connections it was delivered to.
    pub async fn broadcast_response(&self, response: &Response) -> usize {
        let frame = match codec::encode(response) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping broadcast: {e}");
                return 0;
            }
        };
        self.broadcast(&frame).await
    }

    /// Write an already-encoded frame to every connection.
    pub async fn broadcast(&self, frame: &[u8]) -> usize {
        match &self.transport {
            Some(transport) => transport.broadcast(frame).await,
            None => {
                debug!("Broadcast before start; no connections");
                0
            }
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().map(TransportServer::local_addr)
    }

    /// Number of registered live connections.
    pub fn connection_count(&self) -> usize {
        self.transport
            .as_ref()
            .map_or(0, |transport| transport.connections().len())
    }
}
