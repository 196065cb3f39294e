//! Handler capabilities and adapters
//!
//! Two public handler forms exist: untyped handlers receive the raw context;
//! typed handlers are parameterized over request and response shapes, with
//! the framework binding and validating the body before the user function
//! runs and serializing the result afterwards.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use validator::Validate;

use crate::context::Context;
use crate::error::Result;

/// Object-safe handler capability
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process one invocation
    async fn call(&self, ctx: &mut Context) -> Result<()>;
}

/// Shared handler reference stored in routing tables
pub type ArcHandler = Arc<dyn Handler>;

// ============================================================================
// Untyped closures
// ============================================================================

/// Closure adapter for untyped handlers
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    async fn call(&self, ctx: &mut Context) -> Result<()> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a handler
///
/// ```rust,ignore
/// let handler = fn_handler(|ctx| Box::pin(async move {
///     ctx.json(&serde_json::json!({"message": "Hello"}))
/// }));
/// ```
pub fn fn_handler<F>(f: F) -> ArcHandler
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

// ============================================================================
// Typed handlers
// ============================================================================

/// Outcome of a typed handler, selecting the success status
pub enum TypedOutcome<Res> {
    /// Serialize with status 200
    Ok(Res),
    /// Serialize with status 201
    Created(Res),
}

/// Typed handler adapter
///
/// Binds and validates the incoming body into `Req` before invoking the user
/// function, then serializes the returned shape as JSON at the status the
/// outcome indicates.
pub struct TypedHandler<Req, Res, F> {
    f: F,
    _marker: PhantomData<fn(Req) -> Res>,
}

#[async_trait]
impl<Req, Res, F> Handler for TypedHandler<Req, Res, F>
where
    Req: DeserializeOwned + Validate + Send + 'static,
    Res: Serialize + Send + 'static,
    F: for<'a> Fn(&'a mut Context, Req) -> BoxFuture<'a, Result<TypedOutcome<Res>>>
        + Send
        + Sync,
{
    async fn call(&self, ctx: &mut Context) -> Result<()> {
        let request: Req = ctx.parse_request()?;
        match (self.f)(ctx, request).await? {
            TypedOutcome::Ok(value) => ctx.ok(&value),
            TypedOutcome::Created(value) => ctx.created(&value),
        }
    }
}

/// Wrap a typed async closure as a handler
pub fn typed_handler<Req, Res, F>(f: F) -> ArcHandler
where
    Req: DeserializeOwned + Validate + Send + 'static,
    Res: Serialize + Send + 'static,
    F: for<'a> Fn(&'a mut Context, Req) -> BoxFuture<'a, Result<TypedOutcome<Res>>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(TypedHandler {
        f,
        _marker: PhantomData,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::request::{Request, TriggerKind};
    use crate::sink::Logger;
    use http::StatusCode;
    use serde::Deserialize;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn test_context(body: &[u8]) -> Context {
        let mut request = Request::new(TriggerKind::HttpV2);
        request.body = body.to_vec();
        Context::new(
            request,
            "req_test".to_string(),
            Logger::disabled(),
            Arc::new(Metrics::disabled()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn untyped_closure_writes_response() {
        let handler = fn_handler(|ctx| {
            Box::pin(async move { ctx.json(&json!({"message": "Hello"})) })
        });
        let mut ctx = test_context(b"");
        handler.call(&mut ctx).await.unwrap();
        assert_eq!(**ctx.response.body().unwrap(), json!({"message": "Hello"}));
    }

    #[derive(Debug, Deserialize, Validate)]
    struct CreateUser {
        #[validate(length(min = 1, code = "required"))]
        name: String,
    }

    #[derive(Debug, Serialize)]
    struct UserReply {
        id: u64,
        name: String,
    }

    #[tokio::test]
    async fn typed_handler_binds_then_serializes_201() {
        let handler = typed_handler(|_ctx, req: CreateUser| {
            Box::pin(async move {
                Ok(TypedOutcome::Created(UserReply {
                    id: 1,
                    name: req.name,
                }))
            })
        });
        let mut ctx = test_context(br#"{"name":"Alice"}"#);
        handler.call(&mut ctx).await.unwrap();
        assert_eq!(ctx.response.status, StatusCode::CREATED);
        assert_eq!(
            **ctx.response.body().unwrap(),
            json!({"id": 1, "name": "Alice"})
        );
    }

    #[tokio::test]
    async fn typed_handler_defaults_to_200() {
        let handler = typed_handler(|_ctx, req: CreateUser| {
            Box::pin(async move {
                Ok(TypedOutcome::Ok(UserReply {
                    id: 2,
                    name: req.name,
                }))
            })
        });
        let mut ctx = test_context(br#"{"name":"Bob"}"#);
        handler.call(&mut ctx).await.unwrap();
        assert_eq!(ctx.response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn typed_handler_rejects_invalid_bodies_before_user_code() {
        let handler = typed_handler(|ctx, _req: CreateUser| {
            Box::pin(async move {
                // Binding fails first, so this is never reached
                ctx.set("user_code_ran", true);
                Ok(TypedOutcome::Ok(UserReply {
                    id: 0,
                    name: String::new(),
                }))
            })
        });
        let mut probe = test_context(br#"{"name":"ok"}"#);
        handler.call(&mut probe).await.unwrap();
        assert_eq!(probe.get::<bool>("user_code_ran"), Some(&true));
        let mut ctx = test_context(br#"{"name":""}"#);
        let err = handler.call(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
        assert_eq!(
            err.details.unwrap().get("name"),
            Some(&json!(["required"]))
        );
        assert_eq!(ctx.get::<bool>("user_code_ran"), None);
    }
}
