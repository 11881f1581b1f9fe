//! A single live client connection.

use std::net::SocketAddr;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Outbound half of a connection.
pub type FrameWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Stable handle for a registered connection. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub(crate) u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A connected client and the write side of its socket.
pub struct Connection {
    /// Registry handle
    pub id: ConnectionId,
    /// Remote address
    pub peer: SocketAddr,
    writer: Mutex<FrameWriter>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, peer: SocketAddr, writer: FrameWriter) -> Self {
        Self {
            id,
            peer,
            writer: Mutex::new(writer),
        }
    }

    /// Write one complete frame. Concurrent senders are serialized, so a
    /// direct reply and a broadcast never interleave on the wire.
    pub async fn send(&self, frame: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await
    }

    /// Close the write side of the socket.
    pub async fn shutdown(&self) -> std::io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
