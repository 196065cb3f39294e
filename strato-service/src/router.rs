//! Static, parametric, and trigger-keyed route matching
//!
//! Static routes resolve through an exact-match table; parametric routes
//! (`:name` segments) are matched per method by segment comparison, with the
//! route carrying fewer parameters winning when several match and
//! registration order breaking remaining ties. Non-HTTP triggers dispatch
//! through parallel tables keyed by trigger kind and action key (queue name,
//! websocket route key, scheduled rule name).
//!
//! Registration is validated eagerly: a malformed pattern or duplicate route
//! is rejected with an error and leaves every table unchanged.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::handler::ArcHandler;
use crate::middleware::ArcMiddleware;
use crate::request::{Request, TriggerKind};

/// Normalize a path: leading slash, no trailing slash except the root
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn split_segments(path: &str) -> Vec<&str> {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
}

/// A registered handler with its route-level middleware stack
#[derive(Clone)]
pub struct RouteEntry {
    /// The handler to invoke on match
    pub handler: ArcHandler,

    /// Middleware applied around this route (group middleware first)
    pub middleware: Vec<ArcMiddleware>,
}

struct PatternRoute {
    segments: Vec<Segment>,
    param_count: usize,
    entry: RouteEntry,
}

/// Successful route resolution
pub struct RouteMatch<'a> {
    /// Matched handler
    pub handler: &'a ArcHandler,

    /// Route-level middleware stack
    pub middleware: &'a [ArcMiddleware],

    /// Path parameters extracted from the pattern
    pub params: HashMap<String, String>,
}

impl std::fmt::Debug for RouteMatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMatch")
            .field("middleware_count", &self.middleware.len())
            .field("params", &self.params)
            .finish()
    }
}

/// Routing tables for HTTP and trigger-keyed dispatch
#[derive(Default)]
pub struct Router {
    exact: HashMap<(String, String), RouteEntry>,
    parametric: HashMap<String, Vec<PatternRoute>>,
    triggers: HashMap<(TriggerKind, String), RouteEntry>,
}

impl Router {
    /// Empty router
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_pattern(path: &str) -> Result<Vec<Segment>> {
        if !path.starts_with('/') {
            return Err(Error::bad_request(format!(
                "route path must start with '/': {}",
                path
            )));
        }
        split_segments(path)
            .into_iter()
            .map(|segment| {
                if let Some(name) = segment.strip_prefix(':') {
                    if name.is_empty() {
                        return Err(Error::bad_request(format!(
                            "parameter segment missing a name in {}",
                            path
                        )));
                    }
                    Ok(Segment::Param(name.to_string()))
                } else if segment.contains(':') {
                    Err(Error::bad_request(format!(
                        "':' only allowed at segment start in {}",
                        path
                    )))
                } else {
                    Ok(Segment::Static(segment.to_string()))
                }
            })
            .collect()
    }

    /// Shape of a pattern with parameter names erased, for duplicate checks
    fn shape(segments: &[Segment]) -> String {
        segments
            .iter()
            .map(|segment| match segment {
                Segment::Static(s) => format!("/{}", s),
                Segment::Param(_) => "/:".to_string(),
            })
            .collect()
    }

    /// Register a method + path route
    ///
    /// Duplicate registration of the same method and pattern shape is
    /// rejected; the tables are left unchanged on any error.
    pub fn register(
        &mut self,
        method: &str,
        path: &str,
        handler: ArcHandler,
        middleware: Vec<ArcMiddleware>,
    ) -> Result<()> {
        if method.is_empty() {
            return Err(Error::bad_request("route method must be non-empty"));
        }
        let method = method.to_ascii_uppercase();
        let segments = Self::parse_pattern(path)?;
        let entry = RouteEntry { handler, middleware };

        let has_params = segments
            .iter()
            .any(|s| matches!(s, Segment::Param(_)));
        if !has_params {
            let key = (method, normalize_path(path));
            if self.exact.contains_key(&key) {
                return Err(Error::conflict(format!(
                    "route already registered: {} {}",
                    key.0, key.1
                )));
            }
            self.exact.insert(key, entry);
            return Ok(());
        }

        let shape = Self::shape(&segments);
        let routes = self.parametric.entry(method.clone()).or_default();
        if routes.iter().any(|r| Self::shape(&r.segments) == shape) {
            return Err(Error::conflict(format!(
                "route already registered: {} {}",
                method, path
            )));
        }
        let param_count = segments
            .iter()
            .filter(|s| matches!(s, Segment::Param(_)))
            .count();
        routes.push(PatternRoute {
            segments,
            param_count,
            entry,
        });
        Ok(())
    }

    /// Register a trigger-keyed route (queue name, route key, rule name)
    pub fn register_trigger(
        &mut self,
        trigger: TriggerKind,
        key: &str,
        handler: ArcHandler,
        middleware: Vec<ArcMiddleware>,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(Error::bad_request("trigger key must be non-empty"));
        }
        let table_key = (trigger, key.to_string());
        if self.triggers.contains_key(&table_key) {
            return Err(Error::conflict(format!(
                "trigger route already registered: {} {}",
                trigger, key
            )));
        }
        self.triggers
            .insert(table_key, RouteEntry { handler, middleware });
        Ok(())
    }

    /// Look up a method + path, exact first, then parametric
    pub fn lookup(&self, method: &str, path: &str) -> Option<RouteMatch<'_>> {
        let method = method.to_ascii_uppercase();
        let normalized = normalize_path(path);

        if let Some(entry) = self.exact.get(&(method.clone(), normalized.clone())) {
            return Some(RouteMatch {
                handler: &entry.handler,
                middleware: &entry.middleware,
                params: HashMap::new(),
            });
        }

        let candidates = self.parametric.get(&method)?;
        let request_segments = split_segments(&normalized);

        let mut best: Option<&PatternRoute> = None;
        for route in candidates {
            if route.segments.len() != request_segments.len() {
                continue;
            }
            let statics_match = route
                .segments
                .iter()
                .zip(&request_segments)
                .all(|(pattern, actual)| match pattern {
                    Segment::Static(s) => s == actual,
                    Segment::Param(_) => true,
                });
            if !statics_match {
                continue;
            }
            // Fewer parameters is more specific; first registration wins ties
            match best {
                Some(current) if current.param_count <= route.param_count => {}
                _ => best = Some(route),
            }
        }

        best.map(|route| {
            let mut params = HashMap::new();
            for (pattern, actual) in route.segments.iter().zip(&request_segments) {
                if let Segment::Param(name) = pattern {
                    params.insert(name.clone(), (*actual).to_string());
                }
            }
            RouteMatch {
                handler: &route.entry.handler,
                middleware: &route.entry.middleware,
                params,
            }
        })
    }

    /// Look up a trigger-keyed route
    pub fn lookup_trigger(&self, trigger: TriggerKind, key: &str) -> Option<RouteMatch<'_>> {
        self.triggers
            .get(&(trigger, key.to_string()))
            .map(|entry| RouteMatch {
                handler: &entry.handler,
                middleware: &entry.middleware,
                params: HashMap::new(),
            })
    }

    /// Resolve a normalized request to a handler
    ///
    /// HTTP triggers resolve through the path tables. Websocket frames
    /// resolve by route key, falling back to `$default`. Other non-HTTP
    /// triggers try their action key, then a `*` catch-all, then the
    /// synthetic method and path their adapter filled in.
    pub fn resolve(&self, request: &Request) -> Result<RouteMatch<'_>> {
        match request.trigger {
            TriggerKind::HttpV1 | TriggerKind::HttpV2 => self
                .lookup(&request.method, &request.path)
                .ok_or_else(|| not_found(request)),
            TriggerKind::Websocket => self
                .lookup_trigger(TriggerKind::Websocket, &request.trigger_key)
                .or_else(|| self.lookup_trigger(TriggerKind::Websocket, "$default"))
                .ok_or_else(|| not_found(request)),
            TriggerKind::Unknown => self
                .lookup_trigger(TriggerKind::Unknown, "*")
                .ok_or_else(|| {
                    Error::unrecognized_event("no adapter or handler recognized the event")
                }),
            trigger => self
                .lookup_trigger(trigger, &request.trigger_key)
                .or_else(|| self.lookup_trigger(trigger, "*"))
                .or_else(|| self.lookup(&request.method, &request.path))
                .ok_or_else(|| not_found(request)),
        }
    }
}

fn not_found(request: &Request) -> Error {
    Error::not_found(format!(
        "no route for {} {} ({})",
        request.method, request.path, request.trigger
    ))
    .with_detail("trigger", request.trigger.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::fn_handler;

    fn noop() -> ArcHandler {
        fn_handler(|_ctx| Box::pin(async { Ok(()) }))
    }

    fn marked(tag: &'static str) -> ArcHandler {
        fn_handler(move |ctx| {
            Box::pin(async move {
                ctx.set("matched", tag.to_string());
                Ok(())
            })
        })
    }

    #[test]
    fn exact_match_wins() {
        let mut router = Router::new();
        router.register("GET", "/users", noop(), Vec::new()).unwrap();
        assert!(router.lookup("GET", "/users").is_some());
        assert!(router.lookup("POST", "/users").is_none());
        assert!(router.lookup("GET", "/orders").is_none());
    }

    #[test]
    fn parametric_match_extracts_params() {
        let mut router = Router::new();
        router
            .register("GET", "/a/:x", noop(), Vec::new())
            .unwrap();

        let matched = router.lookup("GET", "/a/b").unwrap();
        assert_eq!(matched.params.get("x").map(String::as_str), Some("b"));

        assert!(router.lookup("GET", "/a").is_none());
        assert!(router.lookup("GET", "/a/b/c").is_none());
    }

    #[test]
    fn fewer_params_is_more_specific() {
        let mut router = Router::new();
        router
            .register("GET", "/users/:id/orders/:oid", marked("two"), Vec::new())
            .unwrap();
        router
            .register("GET", "/users/:id/orders/latest", marked("one"), Vec::new())
            .unwrap();

        // Both patterns match; the one with fewer parameter segments wins
        let matched = router.lookup("GET", "/users/7/orders/latest").unwrap();
        assert_eq!(matched.params.len(), 1);
        assert_eq!(matched.params.get("id").map(String::as_str), Some("7"));
    }

    #[test]
    fn registration_order_breaks_param_ties() {
        let mut router = Router::new();
        router
            .register("GET", "/a/:x/c", marked("first"), Vec::new())
            .unwrap();
        router
            .register("GET", "/a/b/:y", marked("second"), Vec::new())
            .unwrap();

        // Same parameter count; first registered wins
        let matched = router.lookup("GET", "/a/b/c").unwrap();
        assert_eq!(matched.params.get("x").map(String::as_str), Some("b"));
    }

    #[test]
    fn duplicate_registration_is_rejected_without_mutation() {
        let mut router = Router::new();
        router
            .register("GET", "/users", marked("original"), Vec::new())
            .unwrap();
        let err = router
            .register("GET", "/users", marked("imposter"), Vec::new())
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
        assert!(router.lookup("GET", "/users").is_some());

        router
            .register("GET", "/things/:id", noop(), Vec::new())
            .unwrap();
        let err = router
            .register("GET", "/things/:name", noop(), Vec::new())
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        let mut router = Router::new();
        assert!(router.register("GET", "users", noop(), Vec::new()).is_err());
        assert!(router.register("GET", "/a/:", noop(), Vec::new()).is_err());
        assert!(router.register("", "/a", noop(), Vec::new()).is_err());
        assert!(router
            .register("GET", "/a/b:c", noop(), Vec::new())
            .is_err());
    }

    #[test]
    fn lookup_is_deterministic_across_repeats() {
        let mut router = Router::new();
        router
            .register("GET", "/a/:x", marked("param"), Vec::new())
            .unwrap();
        router
            .register("GET", "/a/b", marked("exact"), Vec::new())
            .unwrap();

        for _ in 0..10 {
            let matched = router.lookup("GET", "/a/b").unwrap();
            // Exact always beats parametric
            assert!(matched.params.is_empty());
        }
    }

    #[test]
    fn trigger_table_resolution() {
        let mut router = Router::new();
        router
            .register_trigger(TriggerKind::Queue, "orders", noop(), Vec::new())
            .unwrap();

        assert!(router.lookup_trigger(TriggerKind::Queue, "orders").is_some());
        assert!(router.lookup_trigger(TriggerKind::Queue, "other").is_none());
        assert!(router
            .lookup_trigger(TriggerKind::Scheduled, "orders")
            .is_none());
    }

    #[test]
    fn resolve_queue_falls_back_to_synthetic_path() {
        let mut router = Router::new();
        router
            .register("POST", "/sqs", noop(), Vec::new())
            .unwrap();

        let mut request = Request::new(TriggerKind::Queue);
        request.method = "POST".to_string();
        request.path = "/sqs".to_string();
        request.trigger_key = "orders".to_string();
        assert!(router.resolve(&request).is_ok());
    }

    #[test]
    fn resolve_websocket_falls_back_to_default_key() {
        let mut router = Router::new();
        router
            .register_trigger(TriggerKind::Websocket, "$default", noop(), Vec::new())
            .unwrap();

        let mut request = Request::new(TriggerKind::Websocket);
        request.trigger_key = "sendMessage".to_string();
        assert!(router.resolve(&request).is_ok());
    }

    #[test]
    fn resolve_unknown_without_catch_all_is_unrecognized() {
        let router = Router::new();
        let request = Request::new(TriggerKind::Unknown);
        let err = router.resolve(&request).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::UnrecognizedEvent);
    }

    #[test]
    fn resolve_http_miss_is_not_found() {
        let router = Router::new();
        let mut request = Request::new(TriggerKind::HttpV2);
        request.method = "GET".to_string();
        request.path = "/missing".to_string();
        let err = router.resolve(&request).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn trailing_slashes_normalize() {
        let mut router = Router::new();
        router.register("GET", "/users/", noop(), Vec::new()).unwrap();
        assert!(router.lookup("GET", "/users").is_some());
        assert!(router.lookup("get", "/users/").is_some());
    }
}
