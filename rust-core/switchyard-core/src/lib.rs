//! # Switchyard Core
//!
//! Request routing and middleware dispatch for async HTTP services.
//!
//! ## Architecture
//!
//! Application code builds a [`Router`] tree at setup time. The server
//! freezes it into a [`RouteTable`] and, for each incoming request, builds a
//! fresh [`Engine`] that tries candidate routes in registration order until
//! one matches. A match runs the applicable global middlewares, the route's
//! own middlewares and finally its handler.
//!
//! ## Modules
//!
//! - `pattern` - Route pattern DSL compiled to anchored regexes
//! - `types` - Path parameter types and conversion
//! - `route` - Route and middleware registrations, option normalization
//! - `router` - Route registry with mounting
//! - `engine` - Per-request one-shot dispatch state machine
//! - `middleware` - Continuation-based middleware runner and built-ins
//! - `request` / `response` - Transport-facing handles
//! - `server` - HTTP server built on Hyper
//! - `logger` - Dispatch error sink and tracing setup
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod engine;
pub mod error;
pub mod logger;
pub mod middleware;
pub mod pattern;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod server;
pub mod types;

pub use engine::{DispatchState, Engine};
pub use error::{Error, Result};
pub use logger::{init_tracing, Logger, RecordingLogger, TracingLogger};
pub use middleware::{cors, logging, CorsConfig, Handler, Middleware, Next, Outcome, RateLimit};
pub use pattern::RoutePattern;
pub use request::Request;
pub use response::{Response, ResponseParts};
pub use route::{OptionsSpec, RouteOptions};
pub use router::{Method, RouteTable, Router, Verb};
pub use server::{Server, ServerConfig};
pub use types::{ParamType, ParamValue, Params};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.1");
    }
}
