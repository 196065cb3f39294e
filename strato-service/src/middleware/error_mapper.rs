//! Error-to-response mapping middleware
//!
//! Catches a structured error returned by anything downstream and writes it
//! to the response at its declared status. Internal causes are logged at
//! ERROR with the request id and never serialized.

use async_trait::async_trait;
use serde_json::{json, Map};
use std::sync::Arc;

use crate::context::Context;
use crate::error::{ErrorKind, Result};
use crate::handler::{ArcHandler, Handler};
use crate::sink::Level;

use super::Middleware;

/// Structured-error response writer
pub struct ErrorMapper;

struct ErrorMapperHandler {
    next: ArcHandler,
}

#[async_trait]
impl Handler for ErrorMapperHandler {
    async fn call(&self, ctx: &mut Context) -> Result<()> {
        let Err(mut err) = self.next.call(ctx).await else {
            return Ok(());
        };

        if err.request_id.is_none() {
            err = err.with_request_id(ctx.request_id.clone());
        }

        if let Some(cause) = &err.source {
            let mut fields = Map::new();
            fields.insert("request_id".into(), json!(ctx.request_id.clone()));
            fields.insert("error_code".into(), json!(err.kind.code()));
            fields.insert("cause".into(), json!(cause.to_string()));
            ctx.logger.log(Level::Error, err.message.clone(), fields);
        } else if err.kind == ErrorKind::Internal {
            let mut fields = Map::new();
            fields.insert("request_id".into(), json!(ctx.request_id.clone()));
            fields.insert("error_code".into(), json!(err.kind.code()));
            ctx.logger.log(Level::Error, err.message.clone(), fields);
        }

        if ctx.response.is_written() {
            ctx.response.reset_for_error();
        }
        ctx.response.status = err.status;
        ctx.response.set_header("Content-Type", "application/json");
        if err.kind == ErrorKind::RateLimited {
            let retry_after = err
                .details
                .as_ref()
                .and_then(|d| d.get("retry_after"))
                .and_then(|v| v.as_u64())
                .unwrap_or(1);
            ctx.response
                .set_header("Retry-After", retry_after.to_string());
        }
        ctx.response.write(serde_json::to_value(err.to_body())?)?;
        Ok(())
    }
}

impl Middleware for ErrorMapper {
    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        Arc::new(ErrorMapperHandler { next })
    }
}
