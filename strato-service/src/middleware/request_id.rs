//! Request id middleware
//!
//! Ensures every invocation carries a correlation id: an incoming
//! `x-request-id` header is honored, otherwise the id generated at context
//! creation stands. The id is echoed on the response so callers can quote it.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::handler::{ArcHandler, Handler};
use crate::ids::RequestId;

use super::Middleware;

/// Response header carrying the correlation id
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Per-invocation id middleware
pub struct RequestIdMiddleware;

struct RequestIdHandler {
    next: ArcHandler,
}

#[async_trait]
impl Handler for RequestIdHandler {
    async fn call(&self, ctx: &mut Context) -> Result<()> {
        let incoming = ctx.header("x-request-id").to_string();
        if !incoming.is_empty() {
            ctx.request_id = incoming;
        } else if ctx.request_id.is_empty() {
            ctx.request_id = RequestId::new().to_string();
        }
        ctx.response
            .set_header(REQUEST_ID_HEADER, ctx.request_id.clone());
        self.next.call(ctx).await
    }
}

impl Middleware for RequestIdMiddleware {
    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        Arc::new(RequestIdHandler { next })
    }
}
