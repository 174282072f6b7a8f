//! # Error Handling
//!
//! Centralized error types for Switchyard core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Dispatch itself never returns these: route mismatches are a plain `false`
//! and handler failures travel to [`crate::logger::Logger::fatal`].

use thiserror::Error;

/// Result type alias for Switchyard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Switchyard runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Method name not known to the router
    #[error("Unsupported HTTP method: {method}")]
    UnsupportedMethod {
        /// The method as given
        method: String,
    },

    /// A route handler returned an error
    #[error("Handler for {route} failed: {source}")]
    Handler {
        /// Resolved URL of the request being handled
        route: String,
        /// Error returned by the handler
        #[source]
        source: anyhow::Error,
    },

    /// A middleware returned an error
    #[error("Middleware for {route} failed: {source}")]
    Middleware {
        /// Resolved URL of the request being handled
        route: String,
        /// Error returned by the middleware
        #[source]
        source: anyhow::Error,
    },

    /// A handler or middleware panicked
    #[error("Panic while dispatching {route}: {message}")]
    Panic {
        /// Resolved URL of the request being handled
        route: String,
        /// Panic payload, when it was a string
        message: String,
    },

    /// HTTP protocol error, including failures reading a request body
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Bytes seen when the limit tripped; for a streamed body this is
        /// `limit + 1`, not the full length
        actual: usize,
    },
}

impl Error {
    pub(crate) fn invalid_pattern(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRoutePattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}
