//! Arca JSON-RPC - Protocol Types
//!
//! Envelope types exchanged over a connection, the polymorphic routing
//! context, the RPC error object with its reserved codes, and the
//! newline-delimited frame codec. Every other crate in the workspace
//! speaks in terms of these types.

pub mod codec;
pub mod error;
pub mod jsonrpc;

pub use codec::{CodecError, decode, encode};
pub use error::{ContextError, ErrorCode, RpcError};
pub use jsonrpc::{Base, Context, HandlerResult, Request, Response, Role};
