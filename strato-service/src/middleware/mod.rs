//! Middleware composition and built-in middlewares
//!
//! A middleware decorates a handler and returns a handler. Chains compose
//! right-to-left so the first-registered middleware is the outermost layer:
//! `chain([a, b, c], h)` behaves as `a(b(c(h)))`. Within an invocation the
//! layers run outer→inner before the handler and inner→outer after it.

pub mod cors;
pub mod error_mapper;
pub mod idempotency;
pub mod logger;
pub mod rate_limit;
pub mod recover;
pub mod request_id;

pub use cors::Cors;
pub use error_mapper::ErrorMapper;
pub use idempotency::{Idempotency, IdempotencyStore, MemoryIdempotencyStore, StoredResponse};
pub use logger::RequestLogger;
pub use rate_limit::RateLimit;
pub use recover::Recover;
pub use request_id::RequestIdMiddleware;

use std::sync::Arc;

use crate::handler::ArcHandler;

/// A decorator producing a wrapped handler
pub trait Middleware: Send + Sync {
    /// Wrap the downstream handler
    fn wrap(&self, next: ArcHandler) -> ArcHandler;
}

/// Shared middleware reference stored in route tables
pub type ArcMiddleware = Arc<dyn Middleware>;

/// Closure adapter for one-off middlewares
pub struct FnMiddleware<F>(F);

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(ArcHandler) -> ArcHandler + Send + Sync,
{
    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        (self.0)(next)
    }
}

/// Wrap a closure as a middleware
pub fn fn_middleware<F>(f: F) -> ArcMiddleware
where
    F: Fn(ArcHandler) -> ArcHandler + Send + Sync + 'static,
{
    Arc::new(FnMiddleware(f))
}

/// Compose middlewares around a handler, first-registered outermost
pub fn chain(middlewares: &[ArcMiddleware], handler: ArcHandler) -> ArcHandler {
    middlewares
        .iter()
        .rev()
        .fold(handler, |next, middleware| middleware.wrap(next))
}
