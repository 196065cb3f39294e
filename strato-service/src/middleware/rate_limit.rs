//! Fixed-window rate limiting keyed by authenticated principal
//!
//! Counts requests per principal per window in process memory. Place after
//! authentication so authenticated users share accurate counters; anonymous
//! callers pool under a single bucket. Exceeding the budget returns a
//! `RateLimited` error carrying `retry_after`, which the error mapper turns
//! into a `Retry-After` header.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{ArcHandler, Handler};

use super::Middleware;

const ANONYMOUS: &str = "anonymous";

struct Window {
    started: Instant,
    count: u32,
}

/// Per-principal fixed-window limiter
pub struct RateLimit {
    limit: u32,
    window: Duration,
    buckets: Arc<DashMap<String, Window>>,
}

impl RateLimit {
    /// Allow `limit` requests per principal per `window`
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: Arc::new(DashMap::new()),
        }
    }
}

struct RateLimitHandler {
    limit: u32,
    window: Duration,
    buckets: Arc<DashMap<String, Window>>,
    next: ArcHandler,
}

#[async_trait]
impl Handler for RateLimitHandler {
    async fn call(&self, ctx: &mut Context) -> Result<()> {
        if self.limit == 0 {
            return self.next.call(ctx).await;
        }

        let principal = {
            let id = ctx.user_id();
            if id.is_empty() {
                ANONYMOUS.to_string()
            } else {
                id
            }
        };

        let now = Instant::now();
        let mut exceeded: Option<u64> = None;
        {
            let mut bucket = self.buckets.entry(principal).or_insert_with(|| Window {
                started: now,
                count: 0,
            });
            if now.duration_since(bucket.started) >= self.window {
                bucket.started = now;
                bucket.count = 0;
            }
            if bucket.count >= self.limit {
                let remaining = self
                    .window
                    .saturating_sub(now.duration_since(bucket.started));
                exceeded = Some(remaining.as_secs().max(1));
            } else {
                bucket.count += 1;
            }
        }

        if let Some(retry_after) = exceeded {
            ctx.response
                .set_header("Retry-After", retry_after.to_string());
            return Err(Error::rate_limited("request budget exceeded")
                .with_detail("retry_after", retry_after)
                .with_request_id(ctx.request_id.clone()));
        }
        self.next.call(ctx).await
    }
}

impl Middleware for RateLimit {
    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        Arc::new(RateLimitHandler {
            limit: self.limit,
            window: self.window,
            buckets: Arc::clone(&self.buckets),
            next,
        })
    }
}
