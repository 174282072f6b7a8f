//! # Route Metadata
//!
//! Registrations stored by the router and consumed by the engine, and the
//! normalization of the loose option forms registration calls accept.

use crate::middleware::{Handler, Middleware};
use crate::pattern::RoutePattern;
use crate::router::Verb;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Owner of middleware entries built outside any router
const GLOBAL_OWNER: u64 = 0;

pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Canonical per-route options
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Methods the route accepts; `Some(vec![])` accepts none
    pub methods: Option<Vec<String>>,
    /// Route-local middlewares, run after the global ones
    pub middlewares: Vec<Middleware>,
}

impl RouteOptions {
    /// Empty options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict accepted methods
    #[must_use]
    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    /// Append a route-local middleware
    #[must_use]
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }
}

/// The option forms a registration call accepts
///
/// A bare method string or a list of them, one middleware or a list of
/// them, or full [`RouteOptions`]. [`OptionsSpec::normalize`] is the only
/// place these shapes are told apart.
#[derive(Debug, Clone, Default)]
pub enum OptionsSpec {
    /// No options
    #[default]
    None,
    /// Method restriction only
    Methods(Vec<String>),
    /// Route-local middlewares only
    Middlewares(Vec<Middleware>),
    /// Both
    Both {
        /// Method restriction
        methods: Vec<String>,
        /// Route-local middlewares
        middlewares: Vec<Middleware>,
    },
}

impl OptionsSpec {
    /// Collapse into canonical options
    #[must_use]
    pub fn normalize(self) -> RouteOptions {
        match self {
            Self::None => RouteOptions::default(),
            Self::Methods(methods) => RouteOptions {
                methods: Some(methods),
                middlewares: Vec::new(),
            },
            Self::Middlewares(middlewares) => RouteOptions {
                methods: None,
                middlewares,
            },
            Self::Both {
                methods,
                middlewares,
            } => RouteOptions {
                methods: Some(methods),
                middlewares,
            },
        }
    }
}

impl From<()> for OptionsSpec {
    fn from((): ()) -> Self {
        Self::None
    }
}

impl From<&str> for OptionsSpec {
    fn from(method: &str) -> Self {
        Self::Methods(vec![method.to_string()])
    }
}

impl From<String> for OptionsSpec {
    fn from(method: String) -> Self {
        Self::Methods(vec![method])
    }
}

impl From<Vec<&str>> for OptionsSpec {
    fn from(methods: Vec<&str>) -> Self {
        Self::Methods(methods.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for OptionsSpec {
    fn from(methods: Vec<String>) -> Self {
        Self::Methods(methods)
    }
}

impl<const N: usize> From<[&str; N]> for OptionsSpec {
    fn from(methods: [&str; N]) -> Self {
        Self::Methods(methods.iter().map(|m| (*m).to_string()).collect())
    }
}

impl From<Middleware> for OptionsSpec {
    fn from(middleware: Middleware) -> Self {
        Self::Middlewares(vec![middleware])
    }
}

impl From<Vec<Middleware>> for OptionsSpec {
    fn from(middlewares: Vec<Middleware>) -> Self {
        Self::Middlewares(middlewares)
    }
}

impl<const N: usize> From<[Middleware; N]> for OptionsSpec {
    fn from(middlewares: [Middleware; N]) -> Self {
        Self::Middlewares(middlewares.into())
    }
}

impl From<RouteOptions> for OptionsSpec {
    fn from(options: RouteOptions) -> Self {
        match options.methods {
            Some(methods) => Self::Both {
                methods,
                middlewares: options.middlewares,
            },
            None if options.middlewares.is_empty() => Self::None,
            None => Self::Middlewares(options.middlewares),
        }
    }
}

/// Which global middlewares a route sees
///
/// A route sees every middleware of the router it was registered on, plus
/// the ancestor middlewares it inherited at mount time.
#[derive(Debug, Clone)]
pub struct MiddlewareScope {
    owner: u64,
    inherited: HashSet<u64>,
    open: bool,
}

impl MiddlewareScope {
    pub(crate) fn new(owner: u64) -> Self {
        Self {
            owner,
            inherited: HashSet::new(),
            open: true,
        }
    }

    /// Apply one mount step: inherit `parent` ids, or stop inheriting
    pub(crate) fn mount(&mut self, inherit: bool, parent: &HashSet<u64>) {
        if !inherit {
            self.open = false;
        }
        if self.open {
            self.inherited.extend(parent.iter().copied());
        }
    }

    /// Check whether `entry` applies to routes in this scope
    #[must_use]
    pub fn admits(&self, entry: &MiddlewareRegistration) -> bool {
        entry.owner == GLOBAL_OWNER
            || entry.owner == self.owner
            || self.inherited.contains(&entry.id)
    }
}

/// A registered route
#[derive(Debug, Clone)]
pub struct RouteRegistration {
    /// Compiled pattern, prefixes included
    pub pattern: RoutePattern,
    /// Terminal handler
    pub handler: Handler,
    /// Normalized options
    pub options: RouteOptions,
    /// Verb bucket the route was registered under
    pub verb: Verb,
    pub(crate) order: usize,
    pub(crate) scope: MiddlewareScope,
}

impl RouteRegistration {
    /// Global middleware visibility of this route
    #[must_use]
    pub const fn scope(&self) -> &MiddlewareScope {
        &self.scope
    }
}

/// A registered global middleware entry
#[derive(Debug, Clone)]
pub struct MiddlewareRegistration {
    /// URL the entry applies to
    pub pattern: RoutePattern,
    /// Middlewares run together, in order
    pub middlewares: Vec<Middleware>,
    /// Methods the entry applies to; `None` is all
    pub methods: Option<Vec<String>>,
    pub(crate) id: u64,
    pub(crate) owner: u64,
}

impl MiddlewareRegistration {
    /// Create a standalone entry, visible to every route
    #[must_use]
    pub fn new(
        pattern: RoutePattern,
        middlewares: Vec<Middleware>,
        methods: Option<Vec<String>>,
    ) -> Self {
        Self {
            pattern,
            middlewares,
            methods,
            id: next_id(),
            owner: GLOBAL_OWNER,
        }
    }
}

/// Method filter shared by routes and middleware entries
///
/// `None` admits everything; an empty list admits nothing.
#[must_use]
pub fn methods_admit(methods: Option<&[String]>, method: &str) -> bool {
    methods.map_or(true, |allowed| {
        allowed.iter().any(|m| m.eq_ignore_ascii_case(method))
    })
}
