//! Panic recovery middleware
//!
//! Catches unexpected failures in downstream handlers and converts them into
//! a sanitized 500 response. The panic detail is logged at ERROR with the
//! request id and never reaches the caller.

use async_trait::async_trait;
use futures::FutureExt;
use http::StatusCode;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{ArcHandler, Handler};
use crate::sink::Level;

use super::Middleware;

/// Panic recovery middleware; keep close to the outermost layer
pub struct Recover;

struct RecoverHandler {
    next: ArcHandler,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl Handler for RecoverHandler {
    async fn call(&self, ctx: &mut Context) -> Result<()> {
        match AssertUnwindSafe(self.next.call(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let detail = panic_message(payload);
                let mut fields = serde_json::Map::new();
                fields.insert("request_id".into(), json!(ctx.request_id.clone()));
                fields.insert("panic".into(), json!(detail));
                ctx.logger.log(Level::Error, "handler panicked", fields);

                let body = Error::internal("internal server error")
                    .with_request_id(ctx.request_id.clone())
                    .to_body();
                ctx.response.reset_for_error();
                ctx.response.status = StatusCode::INTERNAL_SERVER_ERROR;
                ctx.response.set_header("Content-Type", "application/json");
                ctx.response.write(serde_json::to_value(body)?)?;
                Ok(())
            }
        }
    }
}

impl Middleware for Recover {
    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        Arc::new(RecoverHandler { next })
    }
}
