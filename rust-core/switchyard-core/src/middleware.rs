//! # Middleware System
//!
//! Continuation-passing middlewares and the sequential runner that executes
//! them.
//!
//! A middleware receives the request, the response, a [`Next`] continuation
//! and the captured route parameters. Calling [`Next::advance`] lets the
//! chain continue; returning without advancing stops it. A middleware that
//! returns [`Outcome::Pending`] is awaited before the runner looks at the
//! continuation, one that returns [`Outcome::Ready`] is judged immediately.
//!
//! There is no timeout: a pending middleware that never settles keeps the
//! request waiting.

use crate::error::Error;
use crate::logger::Logger;
use crate::request::Request;
use crate::response::Response;
use crate::types::Params;
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Boxed future returned by asynchronous middlewares and handlers
pub type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// What a middleware or handler invocation returned
pub enum Outcome {
    /// Finished synchronously
    Ready(anyhow::Result<()>),
    /// Still running; the runner awaits it
    Pending(BoxFuture),
}

impl Outcome {
    /// Finished successfully
    #[must_use]
    pub const fn done() -> Self {
        Self::Ready(Ok(()))
    }

    /// Wrap a future as a pending outcome
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Pending(Box::pin(future))
    }
}

impl From<anyhow::Result<()>> for Outcome {
    fn from(result: anyhow::Result<()>) -> Self {
        Self::Ready(result)
    }
}

impl From<()> for Outcome {
    fn from((): ()) -> Self {
        Self::done()
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Single-use continuation handed to each middleware
///
/// Clones share one flag, so the continuation can be moved into a spawned
/// or deferred future. Only the first `advance` has any effect.
#[derive(Debug, Clone, Default)]
pub struct Next {
    advanced: Arc<AtomicBool>,
}

impl Next {
    /// Create a continuation that has not advanced yet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the chain continue past this middleware
    pub fn advance(&self) {
        self.advanced.store(true, Ordering::Release);
    }

    /// Whether `advance` has been called
    #[must_use]
    pub fn has_advanced(&self) -> bool {
        self.advanced.load(Ordering::Acquire)
    }
}

type MiddlewareFn = dyn Fn(Request, Response, Next, Params) -> Outcome + Send + Sync;
type HandlerFn = dyn Fn(Request, Response, Params) -> Outcome + Send + Sync;

/// A middleware function
#[derive(Clone)]
pub struct Middleware {
    name: &'static str,
    f: Arc<MiddlewareFn>,
}

impl Middleware {
    /// Wrap a function returning an [`Outcome`]
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Request, Response, Next, Params) -> Outcome + Send + Sync + 'static,
    {
        Self {
            name: "anonymous",
            f: Arc::new(f),
        }
    }

    /// Wrap a synchronous function
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Request, &Response, &Next, &Params) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::from_fn(move |req, res, next, params| Outcome::Ready(f(&req, &res, &next, &params)))
    }

    /// Wrap an async function
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Response, Next, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::from_fn(move |req, res, next, params| Outcome::pending(f(req, res, next, params)))
    }

    /// Set the name used in logs
    #[must_use]
    pub const fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Middleware name for logging
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Invoke the middleware
    pub fn call(&self, req: Request, res: Response, next: Next, params: Params) -> Outcome {
        (self.f)(req, res, next, params)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware").field("name", &self.name).finish()
    }
}

/// A terminal route handler
#[derive(Clone)]
pub struct Handler {
    f: Arc<HandlerFn>,
}

impl Handler {
    /// Wrap a function returning an [`Outcome`]
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Request, Response, Params) -> Outcome + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Wrap a synchronous function
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Request, &Response, &Params) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::from_fn(move |req, res, params| Outcome::Ready(f(&req, &res, &params)))
    }

    /// Wrap an async function
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Response, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::from_fn(move |req, res, params| Outcome::pending(f(req, res, params)))
    }

    /// Invoke the handler
    pub fn call(&self, req: Request, res: Response, params: Params) -> Outcome {
        (self.f)(req, res, params)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

/// One or more middlewares, as accepted by registration calls
#[derive(Debug, Clone, Default)]
pub struct MiddlewareList(pub Vec<Middleware>);

impl From<Middleware> for MiddlewareList {
    fn from(middleware: Middleware) -> Self {
        Self(vec![middleware])
    }
}

impl From<Vec<Middleware>> for MiddlewareList {
    fn from(middlewares: Vec<Middleware>) -> Self {
        Self(middlewares)
    }
}

impl<const N: usize> From<[Middleware; N]> for MiddlewareList {
    fn from(middlewares: [Middleware; N]) -> Self {
        Self(middlewares.into())
    }
}

enum Failure {
    Error(anyhow::Error),
    Panic(String),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Run an invocation to completion, catching errors and panics
async fn settle<F>(invoke: F) -> Result<(), Failure>
where
    F: FnOnce() -> Outcome,
{
    let outcome = catch_unwind(AssertUnwindSafe(invoke))
        .map_err(|payload| Failure::Panic(panic_message(payload.as_ref())))?;

    let result = match outcome {
        Outcome::Ready(result) => result,
        Outcome::Pending(future) => AssertUnwindSafe(future)
            .catch_unwind()
            .await
            .map_err(|payload| Failure::Panic(panic_message(payload.as_ref())))?,
    };
    result.map_err(Failure::Error)
}

/// Sequential executor for middleware chains
///
/// Borrows the request, response and logger of one dispatch.
pub struct MiddlewareRunner<'a> {
    request: &'a Request,
    response: &'a Response,
    logger: &'a dyn Logger,
    route: &'a str,
}

impl<'a> MiddlewareRunner<'a> {
    /// Create a runner for one request
    ///
    /// `route` is the resolved URL, used in error reports.
    #[must_use]
    pub fn new(
        request: &'a Request,
        response: &'a Response,
        logger: &'a dyn Logger,
        route: &'a str,
    ) -> Self {
        Self {
            request,
            response,
            logger,
            route,
        }
    }

    /// Run `middlewares` in order
    ///
    /// Returns `true` only if every middleware advanced. Stops at the first
    /// one that did not, or that failed.
    pub async fn run(&self, middlewares: &[Middleware], params: &Params) -> bool {
        for middleware in middlewares {
            let next = Next::new();
            let continuation = next.clone();

            let settled = settle(|| {
                middleware.call(
                    self.request.clone(),
                    self.response.clone(),
                    continuation,
                    params.clone(),
                )
            })
            .await;

            if let Err(failure) = settled {
                self.report(failure, |source| Error::Middleware {
                    route: self.route.to_string(),
                    source,
                });
                return false;
            }

            if !next.has_advanced() {
                debug!(
                    middleware = middleware.name(),
                    route = self.route,
                    "Middleware stopped the chain"
                );
                return false;
            }
        }
        true
    }

    /// Invoke the terminal handler
    ///
    /// Failures are reported and swallowed.
    pub async fn invoke(&self, handler: &Handler, params: &Params) {
        let settled = settle(|| {
            handler.call(self.request.clone(), self.response.clone(), params.clone())
        })
        .await;

        if let Err(failure) = settled {
            self.report(failure, |source| Error::Handler {
                route: self.route.to_string(),
                source,
            });
        }
    }

    fn report(&self, failure: Failure, wrap: impl FnOnce(anyhow::Error) -> Error) {
        let err = match failure {
            Failure::Error(source) => wrap(source),
            Failure::Panic(message) => Error::Panic {
                route: self.route.to_string(),
                message,
            },
        };
        self.logger.fatal(&err);
    }
}

/// Logging middleware - logs requests in structured JSON format
#[must_use]
pub fn logging() -> Middleware {
    Middleware::sync(|req, _res, next, _params| {
        let request_id = req.header("x-request-id").unwrap_or("-");
        info!(
            method = %req.method(),
            path = %req.path(),
            request_id = %request_id,
            "Request received"
        );
        next.advance();
        Ok(())
    })
    .named("logging")
}

/// CORS settings - adds Cross-Origin Resource Sharing headers
#[derive(Debug, Clone)]
pub struct CorsConfig {
    allow_origin: String,
    allow_methods: String,
    allow_headers: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, PUT, DELETE, PATCH, OPTIONS".to_string(),
            allow_headers: "Content-Type, Authorization".to_string(),
        }
    }
}

impl CorsConfig {
    /// Create CORS settings with permissive defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set allowed origin
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = origin.into();
        self
    }

    /// Set allowed methods
    #[must_use]
    pub fn allow_methods(mut self, methods: impl Into<String>) -> Self {
        self.allow_methods = methods.into();
        self
    }

    /// Set allowed headers
    #[must_use]
    pub fn allow_headers(mut self, headers: impl Into<String>) -> Self {
        self.allow_headers = headers.into();
        self
    }

    /// Get the Access-Control-Allow-Origin header value
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.allow_origin
    }
}

/// CORS middleware - sets the configured headers, then advances
#[must_use]
pub fn cors(config: CorsConfig) -> Middleware {
    Middleware::sync(move |_req, res, next, _params| {
        res.set_header("Access-Control-Allow-Origin", &config.allow_origin);
        res.set_header("Access-Control-Allow-Methods", &config.allow_methods);
        res.set_header("Access-Control-Allow-Headers", &config.allow_headers);
        next.advance();
        Ok(())
    })
    .named("cors")
}

/// Token bucket rate limiter keyed by `x-client-ip`
///
/// Buckets that have refilled to capacity are evicted, since a fresh bucket
/// behaves the same. With a refill rate of zero nothing ever refills and
/// buckets are kept.
pub struct RateLimit {
    /// Maximum burst capacity
    capacity: u64,
    /// Tokens refilled per second
    refill_per_sec: u64,
    state: Mutex<Buckets>,
}

struct Buckets {
    by_client: HashMap<String, Bucket>,
    last_sweep: Instant,
}

/// Internal token bucket state
struct Bucket {
    tokens: u64,
    last_refill: Instant,
}

impl Bucket {
    /// Time until the bucket is full again
    #[allow(clippy::cast_precision_loss)]
    fn time_to_full(&self, capacity: u64, refill_per_sec: u64) -> Duration {
        let missing = capacity.saturating_sub(self.tokens);
        Duration::from_secs_f64(missing as f64 / refill_per_sec as f64)
    }
}

impl RateLimit {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(capacity: u64, refill_per_sec: u64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(Buckets {
                by_client: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Period of the idle sweep: the time an empty bucket takes to refill
    #[allow(clippy::cast_precision_loss)]
    fn sweep_interval(&self) -> Duration {
        Duration::from_secs_f64(self.capacity as f64 / self.refill_per_sec as f64)
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn allow(&self, key: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        if self.refill_per_sec > 0 && now.duration_since(state.last_sweep) >= self.sweep_interval()
        {
            let (capacity, rate) = (self.capacity, self.refill_per_sec);
            state.by_client.retain(|_, bucket| {
                now.duration_since(bucket.last_refill) < bucket.time_to_full(capacity, rate)
            });
            state.last_sweep = now;
        }

        let bucket = state.by_client.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        if self.refill_per_sec > 0 {
            let elapsed = now.duration_since(bucket.last_refill);
            let refill = (elapsed.as_secs_f64() * self.refill_per_sec as f64) as u64;
            if refill > 0 {
                bucket.tokens = bucket.tokens.saturating_add(refill).min(self.capacity);
                if bucket.tokens == self.capacity {
                    bucket.last_refill = now;
                } else {
                    // Keep the fractional remainder for the next refill.
                    bucket.last_refill += Duration::from_secs_f64(
                        refill as f64 / self.refill_per_sec as f64,
                    );
                }
            }
        }

        if bucket.tokens == 0 {
            return false;
        }
        if bucket.tokens == self.capacity {
            bucket.last_refill = now;
        }
        bucket.tokens -= 1;
        true
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_client
            .len()
    }

    /// Turn the limiter into a middleware
    ///
    /// Over-limit requests get a 429 and the chain stops.
    #[must_use]
    pub fn into_middleware(self) -> Middleware {
        let limiter = Arc::new(self);
        Middleware::sync(move |req, res, next, _params| {
            let key = req.header("x-client-ip").unwrap_or("unknown");
            if limiter.allow(key) {
                next.advance();
            } else {
                warn!(client = %key, "Rate limit exceeded");
                res.set_status(429);
                res.json(&serde_json::json!({"error": "Rate limit exceeded"}))?;
            }
            Ok(())
        })
        .named("rate_limit")
    }
}
