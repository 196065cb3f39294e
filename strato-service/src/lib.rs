//! # strato-service
//!
//! Serverless request-handling framework for managed function runtimes whose
//! invocation API delivers heterogeneous event payloads: HTTP proxy requests,
//! queue batches, object-store notifications, scheduled timers, event-bus
//! messages, and websocket frames.
//!
//! ## Features
//!
//! - **Event adaptation**: shape detection and normalization into a uniform
//!   typed request, with the raw event preserved as an escape hatch
//! - **Routing**: static and `:param` parametric paths, route groups, and
//!   trigger-keyed dispatch for non-HTTP events
//! - **Middleware**: onion-ordered composition with built-in request id,
//!   panic recovery, request logging, error mapping, CORS, rate limiting,
//!   and idempotency replay
//! - **Typed handlers**: declarative request binding and validation
//! - **Observability sink**: batched, bounded, concurrency-safe structured
//!   log pipeline with sensitive-field redaction and error notifications
//!
//! ## Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use strato_service::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let mut app = App::new(config);
//!     app.get(
//!         "/hello",
//!         fn_handler(|ctx| {
//!             Box::pin(async move { ctx.json(&json!({"message": "Hello"})) })
//!         }),
//!     )?;
//!     app.start();
//!
//!     // Hand each runtime event to the container
//!     let event = json!({
//!         "version": "2.0",
//!         "routeKey": "GET /hello",
//!         "requestContext": {"http": {"method": "GET", "path": "/hello"}}
//!     });
//!     let reply = app.handle(event).await?;
//!     println!("{}", reply);
//!
//!     app.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod handler;
pub mod ids;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod request;
pub mod response;
pub mod router;
pub mod sink;
pub mod validation;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::app::{App, AppBuilder, Group};
    pub use crate::config::Config;
    pub use crate::context::{Context, Scoped};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::event::{AdapterRegistry, EventAdapter};
    pub use crate::handler::{
        fn_handler, typed_handler, ArcHandler, Handler, TypedOutcome,
    };
    pub use crate::ids::RequestId;
    pub use crate::metrics::Metrics;
    pub use crate::middleware::{
        chain, fn_middleware, ArcMiddleware, Cors, ErrorMapper, Idempotency, IdempotencyStore,
        MemoryIdempotencyStore, Middleware, RateLimit, Recover, RequestIdMiddleware,
        RequestLogger,
    };
    pub use crate::observability::init_tracing;
    pub use crate::request::{Record, Request, TriggerKind};
    pub use crate::response::{Response, ResponseBuffer};
    pub use crate::router::Router;
    pub use crate::sink::{
        ErrorNotifier, Level, LogEntry, LogTransport, Logger, SinkConfig,
    };
}
