//! Dispatcher: resolves a request against the registries, runs the
//! handler inside a panic boundary, and maps the outcome to a response.
//!
//! For one request:
//! 1. Extract the routing key from `Context` for the role. Failure is an
//!    Invalid Request error.
//! 2. Resolve (key, method) in the role's registry. A miss is Method not
//!    found.
//! 3. Invoke the handler. A panic becomes an Internal error.
//! 4. Map the outcome: a non-null result is a success response, a null
//!    result sends nothing, an error is an Internal error.
//!
//! Delivery (reply vs. broadcast) is left to the caller.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use arca_protocol::{ContextError, HandlerResult, Request, Response, Role, RpcError};
use arca_transport::RequestHandler;
use tracing::{debug, warn};

use crate::registry::HandlerRegistry;

thread_local! {
    static IN_HANDLER: Cell<bool> = const { Cell::new(false) };
}

static QUIET_HOOK: Once = Once::new();

/// Wrap the current panic hook so panics raised inside a handler are not
/// printed. They are logged once when the dispatcher catches them.
fn install_quiet_hook() {
    QUIET_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !IN_HANDLER.with(Cell::get) {
                previous(info);
            }
        }));
    });
}

/// Routes requests for one server. `S` is the store handle type handed to
/// target factories.
pub struct Dispatcher<S = ()> {
    registry: HandlerRegistry<S>,
}

impl<S: Send + Sync + 'static> Dispatcher<S> {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry<S> {
        &self.registry
    }

    /// Dispatch a request that arrived on a client connection.
    pub fn dispatch_source(&self, request: &Request) -> Option<Response> {
        let key = match request.context.key_for(Role::Source) {
            Ok(key) => key,
            Err(e) => return Some(invalid_request(request, e)),
        };
        let Some(handler) = self.registry.resolve_source(key, &request.method) else {
            return Some(method_not_found(request, Role::Source, key));
        };
        complete(request, || handler(request))
    }

    /// Dispatch a server-initiated notification against the target
    /// registry, materializing the handler with `store`.
    pub fn dispatch_target(&self, request: &Request, store: Arc<S>) -> Option<Response> {
        let key = match request.context.key_for(Role::Target) {
            Ok(key) => key,
            Err(e) => return Some(invalid_request(request, e)),
        };
        let Some(factory) = self.registry.resolve_target(key, &request.method) else {
            return Some(method_not_found(request, Role::Target, key));
        };
        complete(request, || factory(store)(request))
    }
}

impl<S: Send + Sync + 'static> Default for Dispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send + Sync + 'static> RequestHandler for Dispatcher<S> {
    fn handle_request(&self, request: Request) -> Option<Response> {
        self.dispatch_source(&request)
    }
}

fn complete(request: &Request, invoke: impl FnOnce() -> HandlerResult) -> Option<Response> {
    install_quiet_hook();
    let outer = IN_HANDLER.replace(true);
    let outcome = panic::catch_unwind(AssertUnwindSafe(invoke));
    IN_HANDLER.set(outer);

    match outcome {
        Ok(Ok(Some(result))) if !result.is_null() => Some(Response::success(request.base(), result)),
        Ok(Ok(_)) => {
            debug!("{} {} produced no result; nothing sent", request.id, request.method);
            None
        }
        Ok(Err(e)) => {
            debug!("{} {} failed: {e:#}", request.id, request.method);
            Some(Response::failure(
                request.base(),
                RpcError::internal(&request.id, &request.method, e.to_string()),
            ))
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            warn!("Handler for {} panicked: {msg}", request.method);
            Some(Response::failure(
                request.base(),
                RpcError::internal(&request.id, &request.method, msg),
            ))
        }
    }
}

fn invalid_request(request: &Request, err: ContextError) -> Response {
    debug!("{} {}: {err}", request.id, request.method);
    Response::failure(
        request.base(),
        RpcError::invalid_request(&request.id, &request.method, err.to_string()),
    )
}

fn method_not_found(request: &Request, role: Role, key: &str) -> Response {
    debug!("No {role} handler for {key}/{}", request.method);
    Response::failure(request.base(), RpcError::method_not_found(&request.id, &request.method))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
