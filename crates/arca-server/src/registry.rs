//! HandlerRegistry: two-level (context → method) handler tables.

use std::collections::HashMap;
use std::sync::Arc;

use arca_protocol::{HandlerResult, Request};
use parking_lot::RwLock;
use tracing::debug;

/// Handler for requests arriving on a client connection.
pub type SourceHandler = Arc<dyn Fn(&Request) -> HandlerResult + Send + Sync>;

/// Handler produced by a [`TargetFactory`] for a single notification.
pub type BoundHandler = Box<dyn Fn(&Request) -> HandlerResult>;

/// Builds a handler bound to the store handle of the current notification.
pub type TargetFactory<S> = Arc<dyn Fn(Arc<S>) -> BoundHandler + Send + Sync>;

type Table<T> = HashMap<String, HashMap<String, T>>;

/// Source and target handler tables.
///
/// Registering the same (context, method) pair again replaces the earlier
/// handler. Registration is expected to happen before traffic starts, but
/// the tables sit behind `RwLock`s so late registrations are still seen by
/// subsequent requests.
pub struct HandlerRegistry<S> {
    sources: RwLock<Table<SourceHandler>>,
    targets: RwLock<Table<TargetFactory<S>>>,
}

impl<S: Send + Sync + 'static> HandlerRegistry<S> {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            targets: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_source<H>(&self, method: &str, context: &str, handler: H)
    where
        H: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        debug!("Registering source handler {context}/{method}");
        let handler: SourceHandler = Arc::new(handler);
        insert(&self.sources, context, method, handler);
    }

    pub fn register_target<F, H>(&self, method: &str, context: &str, factory: F)
    where
        F: Fn(Arc<S>) -> H + Send + Sync + 'static,
        H: Fn(&Request) -> HandlerResult + 'static,
    {
        debug!("Registering target handler {context}/{method}");
        let factory: TargetFactory<S> = Arc::new(move |store| Box::new(factory(store)) as BoundHandler);
        insert(&self.targets, context, method, factory);
    }

    /// Unknown context and unknown method both resolve to `None`.
    pub fn resolve_source(&self, context: &str, method: &str) -> Option<SourceHandler> {
        lookup(&self.sources, context, method)
    }

    pub fn resolve_target(&self, context: &str, method: &str) -> Option<TargetFactory<S>> {
        lookup(&self.targets, context, method)
    }

    /// Registered (context, method) pairs for source handlers, sorted.
    pub fn source_methods(&self) -> Vec<(String, String)> {
        list(&self.sources)
    }

    /// Registered (context, method) pairs for target handlers, sorted.
    pub fn target_methods(&self) -> Vec<(String, String)> {
        list(&self.targets)
    }
}

impl<S: Send + Sync + 'static> Default for HandlerRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn insert<T>(table: &RwLock<Table<T>>, context: &str, method: &str, handler: T) {
    table
        .write()
        .entry(context.to_string())
        .or_default()
        .insert(method.to_string(), handler);
}

fn lookup<T: Clone>(table: &RwLock<Table<T>>, context: &str, method: &str) -> Option<T> {
    table.read().get(context)?.get(method).cloned()
}

fn list<T>(table: &RwLock<Table<T>>) -> Vec<(String, String)> {
    let mut pairs: Vec<_> = table
        .read()
        .iter()
        .flat_map(|(ctx, methods)| methods.keys().map(move |m| (ctx.clone(), m.clone())))
        .collect();
    pairs.sort();
    pairs
}
