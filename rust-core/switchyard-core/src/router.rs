//! # Route Registry
//!
//! Ordered per-verb route buckets plus global middleware entries.
//!
//! ## Features
//!
//! - Registration order is the only precedence; nothing is ranked by
//!   specificity
//! - Typed parameters (`/users/{int:id}`), optional and repeated groups,
//!   wildcards (see [`crate::pattern`])
//! - Sub-routers mounted under a prefix, merged once at mount time
//!
//! A [`Router`] is mutable during setup. Freezing it into a [`RouteTable`]
//! produces the flattened view dispatch runs against.

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::middleware::{Handler, MiddlewareList};
use crate::pattern::{join_paths, RoutePattern};
use crate::request::Request;
use crate::response::Response;
use crate::route::{
    next_id, MiddlewareRegistration, MiddlewareScope, OptionsSpec, RouteRegistration,
};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// HTTP methods supported by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
    /// HTTP PATCH
    Patch,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
}

impl Method {
    /// Upper-case method name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            other => Err(Error::UnsupportedMethod {
                method: other.to_string(),
            }),
        }
    }
}

/// Verb bucket a route is registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Only requests with this method
    Only(Method),
    /// Any method, subject to `RouteOptions::methods`
    All,
}

impl Verb {
    /// Method a request must have, if the bucket pins one
    #[must_use]
    pub const fn method(&self) -> Option<Method> {
        match self {
            Self::Only(method) => Some(*method),
            Self::All => None,
        }
    }
}

impl From<Method> for Verb {
    fn from(method: Method) -> Self {
        Self::Only(method)
    }
}

type Buckets = HashMap<Verb, Vec<RouteRegistration>>;

/// HTTP route registry
///
/// ## Design
///
/// - Routes live in per-verb buckets, each in registration order
/// - Global middlewares are one ordered list, filtered per request by URL
///   and method
/// - `mount` consumes the child, so a router is prefixed exactly once
#[derive(Debug, Clone)]
pub struct Router {
    id: u64,
    base_path: String,
    inherit_middlewares: bool,
    routes: Buckets,
    middlewares: Vec<MiddlewareRegistration>,
    next_order: usize,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a new empty router
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: next_id(),
            base_path: String::new(),
            inherit_middlewares: true,
            routes: HashMap::new(),
            middlewares: Vec::new(),
            next_order: 0,
        }
    }

    /// Create a router whose registrations all live under `base_path`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if `base_path` is malformed.
    pub fn with_base_path(base_path: &str) -> Result<Self> {
        RoutePattern::compile(base_path)?;
        Ok(Self {
            base_path: join_paths(base_path, ""),
            ..Self::new()
        })
    }

    /// Whether mounted routes see the parent's middlewares (default: true)
    #[must_use]
    pub const fn inherit_middlewares(mut self, inherit: bool) -> Self {
        self.inherit_middlewares = inherit;
        self
    }

    /// The base path fixed at construction
    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Register a route under a verb bucket
    ///
    /// # Arguments
    ///
    /// * `verb` - Bucket; `Verb::All` defers to `options` for methods
    /// * `pattern` - Route pattern (e.g., "users/{int:id}")
    /// * `handler` - Terminal handler
    /// * `options` - A method, methods, middleware(s) or `RouteOptions`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn route(
        &mut self,
        verb: impl Into<Verb>,
        pattern: &str,
        handler: Handler,
        options: impl Into<OptionsSpec>,
    ) -> Result<&mut Self> {
        let verb = verb.into();
        let compiled = RoutePattern::compile(&join_paths(&self.base_path, pattern))?;
        let order = self.bump_order();

        debug!(verb = ?verb, pattern = %compiled, "Route registered");
        self.routes.entry(verb).or_default().push(RouteRegistration {
            pattern: compiled,
            handler,
            options: options.into().normalize(),
            verb,
            order,
            scope: MiddlewareScope::new(self.id),
        });
        Ok(self)
    }

    /// Convenience method to add a GET route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn get(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Get, pattern, handler, ())
    }

    /// Add a GET route with options
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn get_with(
        &mut self,
        pattern: &str,
        handler: Handler,
        options: impl Into<OptionsSpec>,
    ) -> Result<&mut Self> {
        self.route(Method::Get, pattern, handler, options)
    }

    /// Convenience method to add a POST route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn post(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Post, pattern, handler, ())
    }

    /// Add a POST route with options
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn post_with(
        &mut self,
        pattern: &str,
        handler: Handler,
        options: impl Into<OptionsSpec>,
    ) -> Result<&mut Self> {
        self.route(Method::Post, pattern, handler, options)
    }

    /// Convenience method to add a PUT route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn put(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Put, pattern, handler, ())
    }

    /// Add a PUT route with options
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn put_with(
        &mut self,
        pattern: &str,
        handler: Handler,
        options: impl Into<OptionsSpec>,
    ) -> Result<&mut Self> {
        self.route(Method::Put, pattern, handler, options)
    }

    /// Convenience method to add a DELETE route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn delete(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Delete, pattern, handler, ())
    }

    /// Add a DELETE route with options
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn delete_with(
        &mut self,
        pattern: &str,
        handler: Handler,
        options: impl Into<OptionsSpec>,
    ) -> Result<&mut Self> {
        self.route(Method::Delete, pattern, handler, options)
    }

    /// Convenience method to add a PATCH route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn patch(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Patch, pattern, handler, ())
    }

    /// Add a PATCH route with options
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn patch_with(
        &mut self,
        pattern: &str,
        handler: Handler,
        options: impl Into<OptionsSpec>,
    ) -> Result<&mut Self> {
        self.route(Method::Patch, pattern, handler, options)
    }

    /// Convenience method to add a HEAD route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn head(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Head, pattern, handler, ())
    }

    /// Add a HEAD route with options
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn head_with(
        &mut self,
        pattern: &str,
        handler: Handler,
        options: impl Into<OptionsSpec>,
    ) -> Result<&mut Self> {
        self.route(Method::Head, pattern, handler, options)
    }

    /// Convenience method to add an OPTIONS route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn options(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Options, pattern, handler, ())
    }

    /// Add an OPTIONS route with options
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn options_with(
        &mut self,
        pattern: &str,
        handler: Handler,
        options: impl Into<OptionsSpec>,
    ) -> Result<&mut Self> {
        self.route(Method::Options, pattern, handler, options)
    }

    /// Convenience method to add a route for every method
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn all(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Verb::All, pattern, handler, ())
    }

    /// Add a route for every method with options
    ///
    /// `options` may still restrict the accepted methods.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn all_with(
        &mut self,
        pattern: &str,
        handler: Handler,
        options: impl Into<OptionsSpec>,
    ) -> Result<&mut Self> {
        self.route(Verb::All, pattern, handler, options)
    }

    /// Register global middlewares for URLs matching `pattern`
    ///
    /// `options` may restrict methods and may carry further middlewares,
    /// which run after `middlewares`. An entry with no middlewares at all is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn use_middleware(
        &mut self,
        pattern: &str,
        middlewares: impl Into<MiddlewareList>,
        options: impl Into<OptionsSpec>,
    ) -> Result<&mut Self> {
        let compiled = RoutePattern::compile(&join_paths(&self.base_path, pattern))?;
        let options = options.into().normalize();
        let mut list = middlewares.into().0;
        list.extend(options.middlewares);

        if list.is_empty() {
            return Ok(self);
        }

        debug!(pattern = %compiled, count = list.len(), "Middleware registered");
        self.middlewares.push(MiddlewareRegistration {
            pattern: compiled,
            middlewares: list,
            methods: options.methods,
            id: next_id(),
            owner: self.id,
        });
        Ok(self)
    }

    /// Merge `child` under `base`
    ///
    /// The child's routes and middlewares are prefixed once and appended in
    /// their original order. If the child inherits middlewares, its routes
    /// also see this router's middlewares registered so far.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if `base` is malformed
    pub fn mount(&mut self, base: &str, child: Self) -> Result<&mut Self> {
        let prefix = join_paths(&self.base_path, base);
        RoutePattern::compile(&prefix)?;

        let parent_ids: HashSet<u64> = self
            .middlewares
            .iter()
            .filter(|entry| entry.owner == self.id)
            .map(|entry| entry.id)
            .collect();

        let mut routes: Vec<RouteRegistration> = child.routes.into_values().flatten().collect();
        routes.sort_by_key(|route| route.order);

        for mut route in routes {
            route.pattern = route.pattern.prefixed(&prefix)?;
            route.order = self.bump_order();
            route.scope.mount(child.inherit_middlewares, &parent_ids);
            self.routes.entry(route.verb).or_default().push(route);
        }

        for mut entry in child.middlewares {
            entry.pattern = entry.pattern.prefixed(&prefix)?;
            self.middlewares.push(entry);
        }

        debug!(prefix = %prefix, "Router mounted");
        Ok(self)
    }

    /// Routes a request with `method` should be tried against, in order
    ///
    /// The method's own bucket merged with the `All` bucket.
    #[must_use]
    pub fn candidates(&self, method: &str) -> Vec<&RouteRegistration> {
        candidates(&self.routes, method)
    }

    /// Registered global middlewares, in order
    #[must_use]
    pub fn middlewares(&self) -> &[MiddlewareRegistration] {
        &self.middlewares
    }

    /// Total number of routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    /// Check if no routes are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bump_order(&mut self) -> usize {
        let order = self.next_order;
        self.next_order += 1;
        order
    }
}

fn candidates<'a>(routes: &'a Buckets, method: &str) -> Vec<&'a RouteRegistration> {
    let own = Method::from_str(method)
        .ok()
        .and_then(|m| routes.get(&Verb::Only(m)));
    let all = routes.get(&Verb::All);

    let mut out: Vec<&RouteRegistration> = own
        .into_iter()
        .chain(all)
        .flat_map(|bucket| bucket.iter())
        .collect();
    out.sort_by_key(|route| route.order);
    out
}

/// Frozen router used while serving
///
/// Holds the flattened middleware list once, so each request's engine
/// seeds from a shared `Arc` instead of a copy.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Buckets,
    middlewares: Arc<[MiddlewareRegistration]>,
}

impl From<Router> for RouteTable {
    fn from(router: Router) -> Self {
        Self {
            routes: router.routes,
            middlewares: router.middlewares.into(),
        }
    }
}

impl RouteTable {
    /// Routes a request with `method` should be tried against, in order
    #[must_use]
    pub fn candidates(&self, method: &str) -> Vec<&RouteRegistration> {
        candidates(&self.routes, method)
    }

    /// Flattened middleware list
    #[must_use]
    pub fn middlewares(&self) -> Arc<[MiddlewareRegistration]> {
        Arc::clone(&self.middlewares)
    }

    /// Dispatch one request
    ///
    /// Builds a fresh engine and tries candidates in order until one
    /// matches. Returns whether any route matched.
    pub async fn dispatch(
        &self,
        request: &Request,
        response: &Response,
        logger: Arc<dyn Logger>,
    ) -> bool {
        let mut engine = Engine::new(request, response, logger);
        engine.use_middlewares(self.middlewares());

        for route in self.candidates(request.method()) {
            if engine.dispatch(route).await {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Middleware;

    fn noop() -> Handler {
        Handler::sync(|_req, _res, _params| Ok(()))
    }

    fn advancing() -> Middleware {
        Middleware::sync(|_req, _res, next, _params| {
            next.advance();
            Ok(())
        })
    }

    fn sources(routes: &[&RouteRegistration]) -> Vec<String> {
        routes.iter().map(|r| r.pattern.source().to_string()).collect()
    }

    #[test]
    fn test_method_round_trip() {
        assert_eq!(Method::from_str("get").unwrap(), Method::Get);
        assert_eq!(Method::Patch.to_string(), "PATCH");
        assert!(Method::from_str("PROPFIND").is_err());
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut router = Router::new();
        router.get("users/{id}", noop()).unwrap();
        router.all("users/*", noop()).unwrap();
        router.get("users/me", noop()).unwrap();
        router.post("users", noop()).unwrap();

        assert_eq!(
            sources(&router.candidates("GET")),
            vec!["users/{id}", "users/*", "users/me"]
        );
        assert_eq!(sources(&router.candidates("post")), vec!["users/*", "users"]);
        assert_eq!(sources(&router.candidates("PROPFIND")), vec!["users/*"]);
        assert_eq!(router.len(), 4);
    }

    #[test]
    fn test_verb_helpers_accept_options() {
        let mut router = Router::new();
        router.get_with("a", noop(), advancing()).unwrap();
        router.all_with("b", noop(), ["PUT", "DELETE"]).unwrap();

        let get = router.candidates("GET");
        assert_eq!(get[0].options.middlewares.len(), 1);
        assert_eq!(get[0].verb, Verb::Only(Method::Get));
        assert_eq!(
            get[1].options.methods,
            Some(vec!["PUT".to_string(), "DELETE".to_string()])
        );
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut router = Router::new();
        assert!(router.get("users/{id", noop()).is_err());
        assert!(router.is_empty());
    }

    #[test]
    fn test_base_path_applied() {
        let mut router = Router::with_base_path("/api/").unwrap();
        router.get("users", noop()).unwrap();
        assert_eq!(router.base_path(), "api");
        assert_eq!(sources(&router.candidates("GET")), vec!["api/users"]);
    }

    #[test]
    fn test_empty_middleware_entry_dropped() {
        let mut router = Router::new();
        router.use_middleware("*", Vec::<Middleware>::new(), ()).unwrap();
        assert!(router.middlewares().is_empty());

        router.use_middleware("*", advancing(), "GET").unwrap();
        assert_eq!(router.middlewares().len(), 1);
        assert_eq!(router.middlewares()[0].methods, Some(vec!["GET".to_string()]));
    }

    #[test]
    fn test_use_middleware_options_append() {
        let mut router = Router::new();
        router.use_middleware("*", advancing(), vec![advancing(), advancing()]).unwrap();
        assert_eq!(router.middlewares()[0].middlewares.len(), 3);
        assert_eq!(router.middlewares()[0].methods, None);
    }

    #[test]
    fn test_mount_prefixes_once() {
        let mut child = Router::with_base_path("users").unwrap();
        child.get("{int:id}", noop()).unwrap();
        child.use_middleware("*", advancing(), ()).unwrap();

        let mut parent = Router::new();
        parent.get("health", noop()).unwrap();
        parent.mount("/api/v1/", child).unwrap();

        assert_eq!(
            sources(&parent.candidates("GET")),
            vec!["health", "api/v1/users/{int:id}"]
        );
        assert_eq!(parent.middlewares()[0].pattern.source(), "api/v1/users/*");
    }

    #[test]
    fn test_mount_middleware_visibility() {
        let mut parent = Router::new();
        parent.use_middleware("*", advancing(), ()).unwrap();

        let mut inheriting = Router::new();
        inheriting.get("a", noop()).unwrap();
        let mut isolated = Router::new().inherit_middlewares(false);
        isolated.get("b", noop()).unwrap();
        isolated.use_middleware("*", advancing(), ()).unwrap();

        parent.get("root", noop()).unwrap();
        parent.mount("x", inheriting).unwrap();
        parent.mount("y", isolated).unwrap();

        let parent_mw = &parent.middlewares()[0];
        let isolated_mw = &parent.middlewares()[1];
        let routes = parent.candidates("GET");

        // root
        assert!(routes[0].scope().admits(parent_mw));
        assert!(!routes[0].scope().admits(isolated_mw));
        // x/a
        assert!(routes[1].scope().admits(parent_mw));
        // y/b
        assert!(!routes[2].scope().admits(parent_mw));
        assert!(routes[2].scope().admits(isolated_mw));
    }

    #[test]
    fn test_parent_middleware_after_mount_not_inherited() {
        let mut child = Router::new();
        child.get("a", noop()).unwrap();

        let mut parent = Router::new();
        parent.mount("x", child).unwrap();
        parent.use_middleware("*", advancing(), ()).unwrap();

        let routes = parent.candidates("GET");
        assert!(!routes[0].scope().admits(&parent.middlewares()[0]));
    }

    #[test]
    fn test_route_table_freezes_router() {
        let mut router = Router::new();
        router.get("a", noop()).unwrap();
        router.use_middleware("*", advancing(), ()).unwrap();

        let table = RouteTable::from(router);
        assert_eq!(table.candidates("GET").len(), 1);
        assert_eq!(table.middlewares().len(), 1);
    }

    #[test]
    fn test_route_table_dispatch() {
        let mut router = Router::new();
        router.get("a", noop()).unwrap();
        let table = RouteTable::from(router);
        let logger: Arc<dyn Logger> = Arc::new(crate::logger::RecordingLogger::new());

        let hit = Request::get("/A/");
        let miss = Request::new("POST", "/a", std::collections::HashMap::new(), None);
        assert!(tokio_test::block_on(table.dispatch(&hit, &Response::new(), Arc::clone(&logger))));
        assert!(!tokio_test::block_on(table.dispatch(&miss, &Response::new(), logger)));
    }
}
