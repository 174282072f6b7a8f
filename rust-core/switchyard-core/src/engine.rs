//! # Dispatch Engine
//!
//! Per-request state machine. The driver builds one engine per request and
//! offers it candidate routes in registration order; the first route whose
//! URL and method validate claims the engine, and every later call is a
//! no-op that reports the request as matched.
//!
//! Once claimed, the engine runs the applicable global middlewares, then the
//! route's own middlewares, then the handler. Each stage runs only if the
//! previous one advanced all the way through.

use crate::logger::Logger;
use crate::middleware::{Handler, MiddlewareRunner};
use crate::pattern::{resolve_url, RoutePattern};
use crate::request::Request;
use crate::response::Response;
use crate::route::{
    methods_admit, MiddlewareRegistration, MiddlewareScope, RouteOptions, RouteRegistration,
};
use crate::router::Method;
use crate::types::Params;
use std::sync::Arc;
use tracing::{debug, trace};

/// Dispatch progress of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    /// No route has matched yet
    #[default]
    Pending,
    /// A route matched; terminal
    Matched,
}

/// Per-request dispatch engine
pub struct Engine {
    resolved_url: String,
    method: String,
    request: Request,
    response: Response,
    logger: Arc<dyn Logger>,
    middlewares: Option<Arc<[MiddlewareRegistration]>>,
    state: DispatchState,
}

impl Engine {
    /// Create an engine for one request
    ///
    /// The request and response handles are shared with the caller; the
    /// engine never finishes or drops the response on its own.
    #[must_use]
    pub fn new(request: &Request, response: &Response, logger: Arc<dyn Logger>) -> Self {
        Self {
            resolved_url: resolve_url(request.path()),
            method: request.method().to_ascii_uppercase(),
            request: request.clone(),
            response: response.clone(),
            logger,
            middlewares: None,
            state: DispatchState::Pending,
        }
    }

    /// Seed the global middleware list
    ///
    /// Only the first call has an effect.
    pub fn use_middlewares(
        &mut self,
        middlewares: impl Into<Arc<[MiddlewareRegistration]>>,
    ) -> &mut Self {
        if self.middlewares.is_none() {
            self.middlewares = Some(middlewares.into());
        }
        self
    }

    /// Request path after trimming slashes and lower-casing
    #[must_use]
    pub fn resolved_url(&self) -> &str {
        &self.resolved_url
    }

    /// Request method, upper-cased
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> DispatchState {
        self.state
    }

    /// Whether a route has matched
    #[must_use]
    pub fn is_matched(&self) -> bool {
        self.state == DispatchState::Matched
    }

    /// Check a pattern string against the resolved URL
    ///
    /// Malformed patterns never match.
    #[must_use]
    pub fn match_url(&self, pattern: &str) -> bool {
        RoutePattern::compile(pattern).is_ok_and(|p| p.is_match(&self.resolved_url))
    }

    /// Check the method constraints of a route
    ///
    /// A verb-specific `override_method` wins over `options.methods`.
    #[must_use]
    pub fn validate_options(&self, options: &RouteOptions, override_method: Option<&str>) -> bool {
        match override_method {
            Some(method) => method.eq_ignore_ascii_case(&self.method),
            None => methods_admit(options.methods.as_deref(), &self.method),
        }
    }

    /// Match URL and method, returning the captured parameters
    #[must_use]
    pub fn run_validations(
        &self,
        pattern: &RoutePattern,
        options: &RouteOptions,
        override_method: Option<&str>,
    ) -> Option<Params> {
        let params = pattern.captures(&self.resolved_url)?;
        self.validate_options(options, override_method)
            .then_some(params)
    }

    /// Try one route
    ///
    /// Resolves `true` if this route matched or an earlier one already did,
    /// `false` if it did not match. Handler and middleware failures are
    /// reported to the logger and do not change the result.
    pub async fn process(
        &mut self,
        pattern: &RoutePattern,
        handler: &Handler,
        options: &RouteOptions,
        override_method: Option<&str>,
    ) -> bool {
        self.process_scoped(pattern, handler, options, override_method, None)
            .await
    }

    /// Try a registered route, honoring its middleware scope
    pub async fn dispatch(&mut self, route: &RouteRegistration) -> bool {
        let method = route.verb.method();
        self.process_scoped(
            &route.pattern,
            &route.handler,
            &route.options,
            method.as_ref().map(Method::as_str),
            Some(route.scope()),
        )
        .await
    }

    async fn process_scoped(
        &mut self,
        pattern: &RoutePattern,
        handler: &Handler,
        options: &RouteOptions,
        override_method: Option<&str>,
        scope: Option<&MiddlewareScope>,
    ) -> bool {
        if self.is_matched() {
            return true;
        }

        let Some(params) = self.run_validations(pattern, options, override_method) else {
            trace!(route = %pattern, url = %self.resolved_url, "Route did not match");
            return false;
        };

        self.claim();
        debug!(
            route = %pattern,
            url = %self.resolved_url,
            method = %self.method,
            "Route matched"
        );
        self.run(handler, &params, options, scope).await;
        true
    }

    /// Pending -> Matched, the only transition
    fn claim(&mut self) {
        self.state = DispatchState::Matched;
    }

    fn selected<'a>(
        &'a self,
        scope: Option<&'a MiddlewareScope>,
    ) -> impl Iterator<Item = &'a MiddlewareRegistration> + 'a {
        self.middlewares
            .iter()
            .flat_map(|list| list.iter())
            .filter(move |entry| scope.map_or(true, |s| s.admits(entry)))
            .filter(move |entry| methods_admit(entry.methods.as_deref(), &self.method))
            .filter(move |entry| entry.pattern.is_match(&self.resolved_url))
    }

    async fn run(
        &self,
        handler: &Handler,
        params: &Params,
        options: &RouteOptions,
        scope: Option<&MiddlewareScope>,
    ) {
        let logger = self.logger.as_ref();
        let runner =
            MiddlewareRunner::new(&self.request, &self.response, logger, &self.resolved_url);

        for entry in self.selected(scope) {
            if !runner.run(&entry.middlewares, params).await {
                return;
            }
        }

        if !runner.run(&options.middlewares, params).await {
            return;
        }

        runner.invoke(handler, params).await;
    }

    /// Try a GET route
    pub async fn get(&mut self, pattern: &str, handler: &Handler, options: &RouteOptions) -> bool {
        self.process_str(pattern, handler, options, Some(Method::Get)).await
    }

    /// Try a POST route
    pub async fn post(&mut self, pattern: &str, handler: &Handler, options: &RouteOptions) -> bool {
        self.process_str(pattern, handler, options, Some(Method::Post)).await
    }

    /// Try a PUT route
    pub async fn put(&mut self, pattern: &str, handler: &Handler, options: &RouteOptions) -> bool {
        self.process_str(pattern, handler, options, Some(Method::Put)).await
    }

    /// Try a DELETE route
    pub async fn delete(
        &mut self,
        pattern: &str,
        handler: &Handler,
        options: &RouteOptions,
    ) -> bool {
        self.process_str(pattern, handler, options, Some(Method::Delete)).await
    }

    /// Try a PATCH route
    pub async fn patch(
        &mut self,
        pattern: &str,
        handler: &Handler,
        options: &RouteOptions,
    ) -> bool {
        self.process_str(pattern, handler, options, Some(Method::Patch)).await
    }

    /// Try a HEAD route
    pub async fn head(&mut self, pattern: &str, handler: &Handler, options: &RouteOptions) -> bool {
        self.process_str(pattern, handler, options, Some(Method::Head)).await
    }

    /// Try an OPTIONS route
    pub async fn options(
        &mut self,
        pattern: &str,
        handler: &Handler,
        options: &RouteOptions,
    ) -> bool {
        self.process_str(pattern, handler, options, Some(Method::Options)).await
    }

    /// Try a route for any method allowed by `options`
    pub async fn all(&mut self, pattern: &str, handler: &Handler, options: &RouteOptions) -> bool {
        self.process_str(pattern, handler, options, None).await
    }

    async fn process_str(
        &mut self,
        pattern: &str,
        handler: &Handler,
        options: &RouteOptions,
        method: Option<Method>,
    ) -> bool {
        if self.is_matched() {
            return true;
        }
        match RoutePattern::compile(pattern) {
            Ok(compiled) => {
                self.process(&compiled, handler, options, method.as_ref().map(Method::as_str))
                    .await
            }
            Err(err) => {
                debug!(error = %err, "Skipping malformed route pattern");
                false
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("resolved_url", &self.resolved_url)
            .field("method", &self.method)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
