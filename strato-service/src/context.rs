//! Per-invocation context
//!
//! The context is a deliberate per-invocation facade: it exclusively owns the
//! request and response, carries shared references to the logger and metrics,
//! and never escapes the dispatch frame. Mutation is safe because its
//! lifetime is strictly scoped to one invocation.

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::request::Request;
use crate::response::{Response, ResponseBuffer};
use crate::sink::Logger;
use crate::validation;

/// Per-invocation state carrier
pub struct Context {
    /// The normalized request; owned exclusively by this invocation
    pub request: Request,

    /// The response under construction
    pub response: Response,

    /// Correlation id for this invocation
    pub request_id: String,

    /// Whether authentication middleware verified the caller
    pub is_authenticated: bool,

    /// Structured logger scoped to this invocation
    pub logger: Logger,

    /// Shared metrics collector
    pub metrics: Arc<Metrics>,

    /// Invocation start time
    pub started_at: DateTime<Utc>,

    state: HashMap<String, Box<dyn Any + Send + Sync>>,
    claims: Map<String, Value>,
    cancellation: CancellationToken,
}

impl Context {
    /// Build a context for one invocation
    pub fn new(
        request: Request,
        request_id: String,
        logger: Logger,
        metrics: Arc<Metrics>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            request,
            response: Response::new(),
            request_id,
            is_authenticated: false,
            logger,
            metrics,
            started_at: Utc::now(),
            state: HashMap::new(),
            claims: Map::new(),
            cancellation,
        }
    }

    // ------------------------------------------------------------------
    // Request accessors
    // ------------------------------------------------------------------

    /// Path parameter; empty string if absent
    pub fn param(&self, key: &str) -> &str {
        self.request.param(key)
    }

    /// Query parameter; empty string if absent
    pub fn query(&self, key: &str) -> &str {
        self.request.query(key)
    }

    /// Case-insensitive header lookup; empty string if absent
    pub fn header(&self, key: &str) -> &str {
        self.request.header(key)
    }

    // ------------------------------------------------------------------
    // User state
    // ------------------------------------------------------------------

    /// Store an arbitrary value under a string key
    pub fn set(&mut self, key: impl Into<String>, value: impl Any + Send + Sync) {
        self.state.insert(key.into(), Box::new(value));
    }

    /// Retrieve a previously stored value by key and type
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.state.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// Replace the verified claims map and mark the caller authenticated
    pub fn set_claims(&mut self, claims: Map<String, Value>) {
        self.claims = claims;
        self.is_authenticated = true;
    }

    /// Verified claims for this invocation
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    fn identity(&self, claim: &str, state_key: &str) -> String {
        if let Some(value) = self.claims.get(claim).and_then(Value::as_str) {
            return value.to_string();
        }
        self.get::<String>(state_key).cloned().unwrap_or_default()
    }

    /// Acting user, from claims (`sub`) or state
    pub fn user_id(&self) -> String {
        self.identity("sub", "user_id")
    }

    /// Tenant the request executes for, from claims or state
    pub fn tenant_id(&self) -> String {
        self.identity("tenant_id", "tenant_id")
    }

    /// Billing account, from claims or state
    pub fn account_id(&self) -> String {
        self.identity("account_id", "account_id")
    }

    // ------------------------------------------------------------------
    // Request binding
    // ------------------------------------------------------------------

    /// Decode and validate the request body into a typed shape
    ///
    /// The body is base64-decoded when flagged, JSON-decoded (JSON is the
    /// only supported content type), then run through the shape's declarative
    /// rules. Rule failures produce a `ValidationError` whose details map
    /// each offending field to its failed rule codes.
    pub fn parse_request<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Validate,
    {
        let body = self
            .request
            .decoded_body()
            .map_err(|err| self.stamp(Error::bad_request(format!("invalid body encoding: {}", err))))?;
        if body.is_empty() {
            return Err(self.stamp(Error::bad_request("request body is empty")));
        }
        let value: T = serde_json::from_slice(&body)
            .map_err(|err| self.stamp(Error::bad_request(format!("invalid JSON body: {}", err))))?;
        validation::validate(&value).map_err(|err| self.stamp(err))?;
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Response writers
    // ------------------------------------------------------------------

    /// Serialize a value as the JSON response body
    pub fn json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let body = serde_json::to_value(value)
            .map_err(|err| self.stamp(Error::internal(format!("unserializable response: {}", err))))?;
        if !self.response.headers.contains_key("Content-Type") {
            self.response
                .set_header("Content-Type", "application/json");
        }
        self.response.write(body).map_err(|err| self.stamp(err))
    }

    /// Write a plain-text response body
    pub fn text(&mut self, body: impl Into<String>) -> Result<()> {
        self.response
            .set_header("Content-Type", "text/plain; charset=utf-8");
        self.response
            .write(Value::String(body.into()))
            .map_err(|err| self.stamp(err))
    }

    /// Write an HTML response body
    pub fn html(&mut self, body: impl Into<String>) -> Result<()> {
        self.response
            .set_header("Content-Type", "text/html; charset=utf-8");
        self.response
            .write(Value::String(body.into()))
            .map_err(|err| self.stamp(err))
    }

    /// Set the response status
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.response.status = status;
        self
    }

    /// 200 with a JSON payload
    pub fn ok<T: Serialize>(&mut self, value: &T) -> Result<()> {
        self.status(StatusCode::OK);
        self.json(value)
    }

    /// 201 with a JSON payload
    pub fn created<T: Serialize>(&mut self, value: &T) -> Result<()> {
        self.status(StatusCode::CREATED);
        self.json(value)
    }

    /// 204 with no body
    pub fn no_content(&mut self) -> Result<()> {
        self.status(StatusCode::NO_CONTENT);
        self.response.write(Value::Null).map_err(|err| self.stamp(err))
    }

    // ------------------------------------------------------------------
    // Error constructors, stamped with this invocation's request id
    // ------------------------------------------------------------------

    fn stamp(&self, err: Error) -> Error {
        if err.request_id.is_some() {
            err
        } else {
            err.with_request_id(self.request_id.clone())
        }
    }

    /// 400 with the given message
    pub fn bad_request(&self, message: impl Into<String>) -> Error {
        self.stamp(Error::bad_request(message))
    }

    /// 401 with the given message
    pub fn unauthorized(&self, message: impl Into<String>) -> Error {
        self.stamp(Error::unauthorized(message))
    }

    /// 403 with the given message
    pub fn forbidden(&self, message: impl Into<String>) -> Error {
        self.stamp(Error::forbidden(message))
    }

    /// 404 with the given message
    pub fn not_found(&self, message: impl Into<String>) -> Error {
        self.stamp(Error::not_found(message))
    }

    /// 409 with the given message
    pub fn conflict(&self, message: impl Into<String>) -> Error {
        self.stamp(Error::conflict(message))
    }

    /// 500 with the given message; attach the cause for logging
    pub fn internal_error(
        &self,
        message: impl Into<String>,
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Error {
        let mut err = self.stamp(Error::internal(message));
        err.source = cause;
        err
    }

    // ------------------------------------------------------------------
    // Deadlines
    // ------------------------------------------------------------------

    /// Cancellation handle supplied by the runtime
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Time elapsed since the invocation started
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Race a future against a scoped deadline
    ///
    /// On expiry the future is dropped and `DeadlineExceeded` is returned;
    /// cancellation is cooperative, nothing is forcibly aborted.
    pub async fn with_timeout<F, T>(&self, duration: Duration, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(duration, future).await {
            Ok(result) => result,
            Err(_) => Err(self.stamp(Error::deadline_exceeded(format!(
                "operation exceeded {}ms",
                duration.as_millis()
            )))),
        }
    }

    // ------------------------------------------------------------------
    // Response buffering
    // ------------------------------------------------------------------

    /// Capture subsequent response writes for post-handler inspection
    pub fn enable_response_buffering(&mut self) {
        self.response.enable_buffering();
    }

    /// The captured buffer, when buffering is enabled
    pub fn get_response_buffer(&self) -> Option<&ResponseBuffer> {
        self.response.buffer()
    }
}

/// Scoped resource with a guaranteed release on every exit path
///
/// Wraps an acquired resource so its release closure runs when the guard
/// drops, whichever way the enclosing scope exits.
pub struct Scoped<T> {
    value: Option<T>,
    release: Option<Box<dyn FnOnce(T) + Send>>,
}

impl<T> Scoped<T> {
    /// Pair an acquired resource with its release action
    pub fn new(value: T, release: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            value: Some(value),
            release: Some(Box::new(release)),
        }
    }

    /// Access the held resource
    pub fn get(&self) -> &T {
        self.value.as_ref().expect("resource present until drop")
    }

    /// Mutable access to the held resource
    pub fn get_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("resource present until drop")
    }
}

impl<T> Drop for Scoped<T> {
    fn drop(&mut self) {
        if let (Some(value), Some(release)) = (self.value.take(), self.release.take()) {
            release(value);
        }
    }
}
