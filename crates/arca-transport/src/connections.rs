//! Registry of live connections, used for broadcast.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionId};

/// Thread-safe set of live connections.
///
/// Add, remove, and snapshot all go through one `parking_lot::Mutex`, which
/// is never held across an await. Writes use each connection's own lock,
/// so a slow broadcast cannot stall accepts or disconnects.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: Mutex<BTreeMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection under a new id.
    pub fn register<W>(&self, peer: SocketAddr, writer: W) -> Arc<Connection>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(Connection::new(id, peer, Box::new(writer)));
        self.connections.lock().insert(id, Arc::clone(&conn));
        conn
    }

    /// Drop a connection. Returns `false` if it was already gone.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.connections.lock().remove(&id).is_some()
    }

    /// Point-in-time copy, ordered by registration.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `frame` to every registered connection.
    ///
    /// A connection whose write fails is removed; its read loop will find
    /// it already gone. Returns the number of successful deliveries.
    pub async fn broadcast(&self, frame: &[u8]) -> usize {
        let targets = self.snapshot();
        let mut delivered = 0;
        for conn in &targets {
            match conn.send(frame).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Broadcast to {} failed: {e}", conn.id);
                    self.remove(conn.id);
                }
            }
        }
        debug!("Broadcast delivered to {delivered}/{} connections", targets.len());
        delivered
    }
}
