//! Transport errors.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] io::Error),

    #[error("server already started")]
    AlreadyStarted,
}

impl TransportError {
    /// Whether binding failed because another socket holds the address.
    pub fn is_addr_in_use(&self) -> bool {
        matches!(self, Self::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse)
    }
}
