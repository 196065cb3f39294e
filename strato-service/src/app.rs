//! Application container: registration API and invocation entrypoint
//!
//! The container owns the router, middleware stack, adapter registry, logger,
//! and metrics. Registration happens before [`App::start`]; afterwards every
//! shared structure is read-only and invocations may run concurrently, each
//! in its own task.
//!
//! Per invocation: the event is adapted into a request, size limits are
//! enforced, the route is resolved, a context is built, the middleware chain
//! runs around the handler, and the response is serialized into the reply
//! payload the runtime delivers back to its caller.

use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::event::{AdapterRegistry, EventAdapter};
use crate::handler::ArcHandler;
use crate::ids::RequestId;
use crate::metrics::{names, Metrics};
use crate::middleware::{
    chain, ArcMiddleware, Cors, ErrorMapper, RateLimit, Recover, RequestIdMiddleware,
    RequestLogger,
};
use crate::router::{normalize_path, Router};
use crate::request::TriggerKind;
use crate::sink::{ErrorNotifier, Logger, LogTransport, NullTransport, SinkConfig};

// ============================================================================
// Builder
// ============================================================================

/// Builder wiring configuration, transport, and notifier into an [`App`]
pub struct AppBuilder {
    config: Option<Config>,
    transport: Option<Arc<dyn LogTransport>>,
    notifier: Option<Arc<dyn ErrorNotifier>>,
    default_middleware: bool,
}

impl AppBuilder {
    /// Builder with defaults: default config, discarding log transport
    pub fn new() -> Self {
        Self {
            config: None,
            transport: None,
            notifier: None,
            default_middleware: true,
        }
    }

    /// Use the given configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Wire the downstream log transport
    pub fn transport(mut self, transport: Arc<dyn LogTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Wire the error notification hook
    pub fn notifier(mut self, notifier: Arc<dyn ErrorNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Skip the batteries-included middleware stack
    ///
    /// Without it there is no request id propagation, panic recovery,
    /// request logging, or error mapping; handler errors surface as reply
    /// failures instead of error bodies.
    pub fn without_default_middleware(mut self) -> Self {
        self.default_middleware = false;
        self
    }

    /// Build the application; must run within a Tokio runtime
    pub fn build(self) -> App {
        let config = self.config.unwrap_or_default();
        let metrics = if config.service.metrics_enabled {
            Arc::new(Metrics::new())
        } else {
            Arc::new(Metrics::disabled())
        };
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(NullTransport) as Arc<dyn LogTransport>);
        let logger =
            Logger::with_notifier(SinkConfig::from_config(&config), transport, self.notifier);

        let mut middleware: Vec<ArcMiddleware> = Vec::new();
        if self.default_middleware {
            middleware.push(Arc::new(RequestIdMiddleware));
            middleware.push(Arc::new(Recover));
            middleware.push(Arc::new(ErrorMapper));
            middleware.push(Arc::new(RequestLogger));
            if !config.cors.allowed_origins.is_empty() {
                middleware.push(Arc::new(Cors::new(config.cors.allowed_origins.clone())));
            }
            if config.rate_limit.per_principal > 0 {
                middleware.push(Arc::new(RateLimit::new(
                    config.rate_limit.per_principal,
                    std::time::Duration::from_secs(config.rate_limit.window_secs),
                )));
            }
        }

        App {
            config,
            router: Router::new(),
            middleware,
            adapters: AdapterRegistry::with_defaults(),
            logger,
            metrics,
            started: AtomicBool::new(false),
        }
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// App
// ============================================================================

/// The application container
pub struct App {
    config: Config,
    router: Router,
    middleware: Vec<ArcMiddleware>,
    adapters: AdapterRegistry,
    logger: Logger,
    metrics: Arc<Metrics>,
    started: AtomicBool,
}

impl App {
    /// Start building an application
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    /// Application with the given configuration and a discarding transport
    pub fn new(config: Config) -> Self {
        AppBuilder::new().config(config).build()
    }

    /// The loaded configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The application-level structured logger
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// The shared metrics collector
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(Error::conflict(
                "registration is not allowed after start()",
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Append an application-level middleware, inside the built-in stack
    pub fn use_middleware(&mut self, middleware: ArcMiddleware) -> Result<()> {
        self.ensure_mutable()?;
        self.middleware.push(middleware);
        Ok(())
    }

    /// Register an additional event adapter, tried after the built-ins
    pub fn register_adapter(&mut self, adapter: Box<dyn EventAdapter>) -> Result<()> {
        self.ensure_mutable()?;
        self.adapters.register(adapter);
        Ok(())
    }

    /// Register a route with route-level middleware
    pub fn route_with(
        &mut self,
        method: &str,
        path: &str,
        handler: ArcHandler,
        middleware: Vec<ArcMiddleware>,
    ) -> Result<()> {
        self.ensure_mutable()?;
        self.router.register(method, path, handler, middleware)
    }

    /// Register a route
    pub fn route(&mut self, method: &str, path: &str, handler: ArcHandler) -> Result<()> {
        self.route_with(method, path, handler, Vec::new())
    }

    /// Register a GET route
    pub fn get(&mut self, path: &str, handler: ArcHandler) -> Result<()> {
        self.route("GET", path, handler)
    }

    /// Register a POST route
    pub fn post(&mut self, path: &str, handler: ArcHandler) -> Result<()> {
        self.route("POST", path, handler)
    }

    /// Register a PUT route
    pub fn put(&mut self, path: &str, handler: ArcHandler) -> Result<()> {
        self.route("PUT", path, handler)
    }

    /// Register a PATCH route
    pub fn patch(&mut self, path: &str, handler: ArcHandler) -> Result<()> {
        self.route("PATCH", path, handler)
    }

    /// Register a DELETE route
    pub fn delete(&mut self, path: &str, handler: ArcHandler) -> Result<()> {
        self.route("DELETE", path, handler)
    }

    /// Handle queue batches from the named queue (`*` for any)
    pub fn queue(&mut self, queue_name: &str, handler: ArcHandler) -> Result<()> {
        self.ensure_mutable()?;
        self.router
            .register_trigger(TriggerKind::Queue, queue_name, handler, Vec::new())
    }

    /// Handle object-store notifications from the named bucket (`*` for any)
    pub fn object_store(&mut self, bucket: &str, handler: ArcHandler) -> Result<()> {
        self.ensure_mutable()?;
        self.router
            .register_trigger(TriggerKind::ObjectStore, bucket, handler, Vec::new())
    }

    /// Handle change-stream batches from the named table (`*` for any)
    pub fn stream(&mut self, table: &str, handler: ArcHandler) -> Result<()> {
        self.ensure_mutable()?;
        self.router
            .register_trigger(TriggerKind::StreamChange, table, handler, Vec::new())
    }

    /// Handle scheduled timers fired by the named rule (`*` for any)
    pub fn schedule(&mut self, rule: &str, handler: ArcHandler) -> Result<()> {
        self.ensure_mutable()?;
        self.router
            .register_trigger(TriggerKind::Scheduled, rule, handler, Vec::new())
    }

    /// Handle event-bus messages from the named source (`*` for any)
    pub fn event_bus(&mut self, source: &str, handler: ArcHandler) -> Result<()> {
        self.ensure_mutable()?;
        self.router
            .register_trigger(TriggerKind::EventBus, source, handler, Vec::new())
    }

    /// Handle websocket frames for the given route key
    pub fn websocket(&mut self, route_key: &str, handler: ArcHandler) -> Result<()> {
        self.ensure_mutable()?;
        self.router
            .register_trigger(TriggerKind::Websocket, route_key, handler, Vec::new())
    }

    /// Handle events no adapter recognized
    pub fn on_unknown(&mut self, handler: ArcHandler) -> Result<()> {
        self.ensure_mutable()?;
        self.router
            .register_trigger(TriggerKind::Unknown, "*", handler, Vec::new())
    }

    /// Open a route group under a shared prefix
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            app: self,
            prefix: normalize_path(prefix),
            middleware: Vec::new(),
        }
    }

    /// Freeze registration; the app is ready for concurrent invocations
    pub fn start(&mut self) {
        self.started.store(true, Ordering::SeqCst);
    }

    /// Close the log sink, draining buffered entries
    pub async fn shutdown(&self) {
        self.logger.close().await;
    }

    // ------------------------------------------------------------------
    // Invocation entrypoint
    // ------------------------------------------------------------------

    /// Process one raw runtime event into a reply payload
    ///
    /// HTTP-classified failures become error replies in the HTTP envelope;
    /// failures of non-HTTP invocations surface as `Err` so the runtime can
    /// apply its retry semantics.
    pub async fn handle(&self, event: Value) -> Result<Value> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(Error::internal("handle() called before start()"));
        }
        self.metrics.increment(names::REQUESTS);
        let started = std::time::Instant::now();
        let result = self.dispatch(event).await;
        self.metrics.record_duration(names::DURATION, started.elapsed());
        if result.is_err() {
            self.metrics.increment(names::ERRORS);
        }
        result
    }

    async fn dispatch(&self, event: Value) -> Result<Value> {
        let mut request = match self.adapters.adapt(&event) {
            Ok(request) => request,
            Err(err) => {
                let http_failure = err
                    .details
                    .as_ref()
                    .and_then(|d| d.get("trigger"))
                    .and_then(Value::as_str)
                    .map(|t| t.starts_with("http"))
                    .unwrap_or(false);
                if http_failure {
                    return Ok(self.error_reply(&err));
                }
                return Err(err);
            }
        };
        let trigger = request.trigger;
        if self.config.service.tracing_enabled {
            tracing::debug!(trigger = %trigger, method = %request.method, path = %request.path, "dispatching event");
        }

        let max_request = self.config.limits.max_request_size;
        if max_request > 0 && request.body.len() > max_request {
            let err = Error::bad_request(format!(
                "request body exceeds {} bytes",
                max_request
            ));
            if trigger.is_http() {
                return Ok(self.error_reply(&err));
            }
            return Err(err);
        }

        let (handler, route_middleware, params) = match self.router.resolve(&request) {
            Ok(matched) => (
                Arc::clone(matched.handler),
                matched.middleware.to_vec(),
                matched.params,
            ),
            Err(err) => {
                if trigger.is_http() {
                    return Ok(self.error_reply(&err));
                }
                return Err(err);
            }
        };
        request.path_params.extend(params);

        let request_id = RequestId::new().to_string();
        let mut log_fields = Map::new();
        log_fields.insert("request_id".into(), json!(request_id.clone()));
        log_fields.insert("trigger".into(), json!(trigger.to_string()));
        let logger = self.logger.with_fields(log_fields);
        let cancellation = CancellationToken::new();
        let mut ctx = Context::new(
            request,
            request_id,
            logger,
            Arc::clone(&self.metrics),
            cancellation.clone(),
        );

        let mut stack = self.middleware.clone();
        stack.extend(route_middleware);
        let composed = chain(&stack, handler);

        let outcome = match self.config.timeout() {
            Some(limit) => match tokio::time::timeout(limit, composed.call(&mut ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    cancellation.cancel();
                    Err(Error::deadline_exceeded(format!(
                        "invocation exceeded {}s",
                        limit.as_secs()
                    ))
                    .with_request_id(ctx.request_id.clone()))
                }
            },
            None => composed.call(&mut ctx).await,
        };

        if let Err(err) = outcome {
            let err = if err.request_id.is_some() {
                err
            } else {
                err.with_request_id(ctx.request_id.clone())
            };
            if trigger.is_http() {
                return Ok(self.error_reply(&err));
            }
            return Err(err);
        }

        self.serialize_reply(&ctx)
    }

    /// Reply envelope: `{statusCode, body, headers, isBase64Encoded}`
    fn serialize_reply(&self, ctx: &Context) -> Result<Value> {
        let response = &ctx.response;
        let body = match response.body() {
            None => String::new(),
            Some(value) => match &**value {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                other => serde_json::to_string(other)
                    .map_err(|err| Error::internal(format!("unserializable reply: {}", err)))?,
            },
        };

        let max_response = self.config.limits.max_response_size;
        if max_response > 0 && body.len() > max_response {
            let err = Error::internal(format!(
                "response body exceeds {} bytes",
                max_response
            ))
            .with_request_id(ctx.request_id.clone());
            return Ok(self.error_reply(&err));
        }

        Ok(json!({
            "statusCode": response.status.as_u16(),
            "body": body,
            "headers": response.headers,
            "isBase64Encoded": response.is_base64_encoded,
        }))
    }

    fn error_reply(&self, err: &Error) -> Value {
        let body = serde_json::to_string(&err.to_body()).unwrap_or_else(|_| {
            format!(r#"{{"code":"{}","message":"serialization failed"}}"#, err.kind.code())
        });
        json!({
            "statusCode": err.status.as_u16(),
            "body": body,
            "headers": {"Content-Type": "application/json"},
            "isBase64Encoded": false,
        })
    }
}

// ============================================================================
// Route groups
// ============================================================================

/// A registration scope sharing a path prefix and middleware stack
///
/// Prefixes concatenate when groups nest; group middleware is prepended to
/// every child route's stack, outer group first.
pub struct Group<'a> {
    app: &'a mut App,
    prefix: String,
    middleware: Vec<ArcMiddleware>,
}

impl<'a> Group<'a> {
    /// Append middleware applied to every route in this group
    pub fn use_middleware(mut self, middleware: ArcMiddleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    fn join(&self, path: &str) -> String {
        if self.prefix == "/" {
            normalize_path(path)
        } else {
            format!("{}{}", self.prefix, normalize_path(path))
        }
    }

    /// Register a route under the group's prefix
    pub fn route(&mut self, method: &str, path: &str, handler: ArcHandler) -> Result<()> {
        self.route_with(method, path, handler, Vec::new())
    }

    /// Register a route with additional route-level middleware
    pub fn route_with(
        &mut self,
        method: &str,
        path: &str,
        handler: ArcHandler,
        middleware: Vec<ArcMiddleware>,
    ) -> Result<()> {
        let full_path = self.join(path);
        let mut stack = self.middleware.clone();
        stack.extend(middleware);
        self.app.route_with(method, &full_path, handler, stack)
    }

    /// Register a GET route under the prefix
    pub fn get(&mut self, path: &str, handler: ArcHandler) -> Result<()> {
        self.route("GET", path, handler)
    }

    /// Register a POST route under the prefix
    pub fn post(&mut self, path: &str, handler: ArcHandler) -> Result<()> {
        self.route("POST", path, handler)
    }

    /// Register a PUT route under the prefix
    pub fn put(&mut self, path: &str, handler: ArcHandler) -> Result<()> {
        self.route("PUT", path, handler)
    }

    /// Register a DELETE route under the prefix
    pub fn delete(&mut self, path: &str, handler: ArcHandler) -> Result<()> {
        self.route("DELETE", path, handler)
    }

    /// Open a nested group; prefixes concatenate, middleware accumulates
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        let nested_prefix = self.join(prefix);
        Group {
            app: &mut *self.app,
            prefix: nested_prefix,
            middleware: self.middleware.clone(),
        }
    }
}
