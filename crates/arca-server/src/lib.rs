//! Arca Server: routes JSON-RPC requests to registered handlers.
//!
//! Handlers are keyed by (context, method) in two independent registries:
//! source handlers answer requests arriving on client connections, target
//! handlers are materialized against a store handle for server-initiated
//! notifications whose outcome is broadcast to every connection.

pub mod dispatch;
pub mod registry;
pub mod server;

pub use dispatch::Dispatcher;
pub use registry::{BoundHandler, HandlerRegistry, SourceHandler, TargetFactory};
pub use server::RpcServer;
