//! # HTTP Response
//!
//! Shared response handle. Every middleware and the handler of a request
//! write into the same response; the server turns it into a hyper response
//! once dispatch returns.

use crate::error::Result;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::StatusCode;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Point-in-time copy of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseParts {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
    /// Content type
    pub content_type: String,
    /// Response headers
    pub headers: HashMap<String, String>,
    /// Whether a body has been sent
    pub finished: bool,
}

impl Default for ResponseParts {
    fn default() -> Self {
        Self {
            status: 200,
            body: String::new(),
            content_type: "text/plain".to_string(),
            headers: HashMap::new(),
            finished: false,
        }
    }
}

/// HTTP response handle
///
/// Clones share state. The lock is never held across an await point.
#[derive(Debug, Clone, Default)]
pub struct Response {
    inner: Arc<Mutex<ResponseParts>>,
}

impl Response {
    /// Create an empty 200 response
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ResponseParts> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set status code
    pub fn set_status(&self, status: u16) -> &Self {
        self.lock().status = status;
        self
    }

    /// Current status code
    #[must_use]
    pub fn status(&self) -> u16 {
        self.lock().status
    }

    /// Set or override a header
    pub fn set_header(&self, key: &str, value: &str) -> &Self {
        let mut parts = self.lock();
        if key.eq_ignore_ascii_case("content-type") {
            parts.content_type = value.to_string();
        } else {
            parts.headers.insert(key.to_ascii_lowercase(), value.to_string());
        }
        drop(parts);
        self
    }

    /// Get a header value (case-insensitive)
    #[must_use]
    pub fn header(&self, key: &str) -> Option<String> {
        let parts = self.lock();
        if key.eq_ignore_ascii_case("content-type") {
            Some(parts.content_type.clone())
        } else {
            parts.headers.get(&key.to_ascii_lowercase()).cloned()
        }
    }

    /// Send a text body
    pub fn send(&self, body: impl Into<String>) {
        let mut parts = self.lock();
        parts.body = body.into();
        parts.finished = true;
    }

    /// Send a JSON body
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let body = serde_json::to_string(value)?;
        let mut parts = self.lock();
        parts.content_type = "application/json".to_string();
        parts.body = body;
        parts.finished = true;
        Ok(())
    }

    /// Whether a body has been sent
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Copy the current state
    #[must_use]
    pub fn snapshot(&self) -> ResponseParts {
        self.lock().clone()
    }

    /// Convert to hyper Response
    pub(crate) fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let parts = self.snapshot();
        let status =
            StatusCode::from_u16(parts.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut builder = hyper::Response::builder()
            .status(status)
            .header("Content-Type", &parts.content_type);
        for (k, v) in &parts.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }

        builder
            .body(Full::new(Bytes::from(parts.body)))
            .unwrap_or_else(|_| {
                let mut fallback =
                    hyper::Response::new(Full::new(Bytes::from("Internal Server Error")));
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            })
    }
}

impl From<ResponseParts> for Response {
    fn from(parts: ResponseParts) -> Self {
        Self {
            inner: Arc::new(Mutex::new(parts)),
        }
    }
}
