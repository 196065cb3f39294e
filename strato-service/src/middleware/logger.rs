//! Request logging middleware
//!
//! Logs request start on entry and status, duration, and error on exit.
//! Every line carries the request id, so placing this after the request id
//! middleware is required for correlation.

use async_trait::async_trait;
use serde_json::{json, Map};
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::handler::{ArcHandler, Handler};
use crate::sink::Level;

use super::Middleware;

/// Entry/exit request logger
pub struct RequestLogger;

struct RequestLoggerHandler {
    next: ArcHandler,
}

#[async_trait]
impl Handler for RequestLoggerHandler {
    async fn call(&self, ctx: &mut Context) -> Result<()> {
        let mut fields = Map::new();
        fields.insert("request_id".into(), json!(ctx.request_id.clone()));
        fields.insert("trigger".into(), json!(ctx.request.trigger.to_string()));
        if ctx.request.trigger.is_http() {
            fields.insert("method".into(), json!(ctx.request.method.clone()));
            fields.insert("path".into(), json!(ctx.request.path.clone()));
        } else if !ctx.request.trigger_key.is_empty() {
            fields.insert("trigger_key".into(), json!(ctx.request.trigger_key.clone()));
        }
        ctx.logger
            .log(Level::Info, "request started", fields.clone());

        let result = self.next.call(ctx).await;

        fields.insert("status".into(), json!(ctx.response.status.as_u16()));
        fields.insert(
            "duration_ms".into(),
            json!(ctx.elapsed().as_millis() as u64),
        );
        match &result {
            Ok(()) => {
                ctx.logger.log(Level::Info, "request completed", fields);
            }
            Err(err) => {
                fields.insert("error_code".into(), json!(err.kind.code()));
                fields.insert("error_message".into(), json!(err.message.clone()));
                ctx.logger.log(Level::Warn, "request failed", fields);
            }
        }
        result
    }
}

impl Middleware for RequestLogger {
    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        Arc::new(RequestLoggerHandler { next })
    }
}
