//! Arca Transport Layer
//!
//! Newline-delimited JSON-RPC over plain TCP. The transport layer handles:
//! - Binding the listening socket and running the accept loop
//! - Registering each accepted connection for broadcast
//! - One read loop (session) per connection, replying on the same socket
//! - Serializing writes so frames never interleave on a socket
//!
//! The transport is decoupled from routing via the `RequestHandler` trait.

pub mod connection;
pub mod connections;
pub mod error;
pub mod server;
mod session;

pub use connection::{Connection, ConnectionId};
pub use connections::ConnectionRegistry;
pub use error::TransportError;
pub use server::{RequestHandler, ServerConfig, TransportServer};
