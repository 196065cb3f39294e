//! CORS middleware for HTTP triggers
//!
//! Driven by the configured allowed-origin list. Preflight OPTIONS requests
//! from an allowed origin are answered directly with 204; other requests get
//! the allow-origin header echoed onto the response. Non-HTTP triggers pass
//! through untouched.

use async_trait::async_trait;
use http::StatusCode;
use serde_json::Value;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::handler::{ArcHandler, Handler};

use super::Middleware;

/// Allowed-origin CORS middleware
pub struct Cors {
    allowed_origins: Vec<String>,
}

impl Cors {
    /// CORS policy from an origin allowlist; `*` allows any origin
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self { allowed_origins }
    }
}

struct CorsHandler {
    allowed_origins: Vec<String>,
    next: ArcHandler,
}

impl CorsHandler {
    fn allows(&self, origin: &str) -> bool {
        self.allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
    }
}

#[async_trait]
impl Handler for CorsHandler {
    async fn call(&self, ctx: &mut Context) -> Result<()> {
        if !ctx.request.trigger.is_http() {
            return self.next.call(ctx).await;
        }
        let origin = ctx.header("origin").to_string();
        if origin.is_empty() {
            return self.next.call(ctx).await;
        }
        if !self.allows(&origin) {
            return Err(ctx.forbidden(format!("origin not allowed: {}", origin)));
        }

        ctx.response
            .set_header("Access-Control-Allow-Origin", origin);
        if ctx.request.method == "OPTIONS" {
            ctx.response.set_header(
                "Access-Control-Allow-Methods",
                "GET, POST, PUT, PATCH, DELETE, OPTIONS",
            );
            ctx.response.set_header(
                "Access-Control-Allow-Headers",
                "Content-Type, Authorization, Idempotency-Key, X-Request-Id",
            );
            ctx.status(StatusCode::NO_CONTENT);
            ctx.response.write(Value::Null)?;
            return Ok(());
        }
        self.next.call(ctx).await
    }
}

impl Middleware for Cors {
    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        Arc::new(CorsHandler {
            allowed_origins: self.allowed_origins.clone(),
            next,
        })
    }
}
