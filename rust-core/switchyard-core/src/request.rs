//! # HTTP Request
//!
//! Cheap-to-clone request handle passed to middlewares and handlers.
//!
//! The body is collected as raw bytes; decoding it (JSON, forms, multipart)
//! is left to the application.

use crate::error::{Error, Result};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use std::collections::HashMap;
use std::sync::Arc;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
struct RequestParts {
    method: String,
    path: String,
    query_string: Option<String>,
    query_params: HashMap<String, String>,
    headers: hyper::HeaderMap,
    body: Option<Bytes>,
}

/// HTTP request handle
///
/// Clones share the same underlying request.
#[derive(Debug, Clone)]
pub struct Request {
    inner: Arc<RequestParts>,
}

impl Request {
    /// Create a request manually (for testing/internal use)
    ///
    /// `path` may carry a query string, which is split off and parsed.
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        headers_map: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Self {
        let path = path.into();
        let (path, query_string) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path, None),
        };

        let query_params = parse_query_string(query_string.as_deref());

        let mut headers = hyper::HeaderMap::new();
        for (k, v) in headers_map {
            if let (Ok(n), Ok(v)) = (
                hyper::header::HeaderName::from_bytes(k.as_bytes()),
                hyper::header::HeaderValue::from_str(&v),
            ) {
                headers.insert(n, v);
            }
        }

        Self::from_parts(RequestParts {
            method: method.into().to_ascii_uppercase(),
            path,
            query_string,
            query_params,
            headers,
            body,
        })
    }

    /// Shorthand for a bodiless request without headers
    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path, HashMap::new(), None)
    }

    fn from_parts(parts: RequestParts) -> Self {
        Self {
            inner: Arc::new(parts),
        }
    }

    /// Create from hyper request with body size limit
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLarge` if `Content-Length` or the streamed
    /// body exceeds `max_body_size`, and `Error::Http` if reading the body
    /// fails.
    pub async fn from_hyper_with_limit(
        req: hyper::Request<hyper::body::Incoming>,
        max_body_size: usize,
    ) -> Result<Self> {
        let method = req.method().as_str().to_string();
        let uri = req.uri();
        let path = uri.path().to_string();
        let query_string = uri.query().map(String::from);
        let query_params = parse_query_string(query_string.as_deref());

        let headers = req.headers().clone();
        if let Some(content_len) = headers
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|len| len.to_str().ok())
            .and_then(|len| len.parse::<usize>().ok())
        {
            if content_len > max_body_size {
                return Err(Error::PayloadTooLarge {
                    limit: max_body_size,
                    actual: content_len,
                });
            }
        }

        let body = collect_limited(req.into_body(), max_body_size).await?;

        Ok(Self::from_parts(RequestParts {
            method,
            path,
            query_string,
            query_params,
            headers,
            body: Some(body),
        }))
    }

    /// HTTP method, upper-cased
    #[must_use]
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// Request path (without query string)
    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    ///
    /// Only affects this handle if other clones exist.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            hyper::header::HeaderName::from_bytes(name.as_bytes()),
            hyper::header::HeaderValue::from_str(value),
        ) {
            Arc::make_mut(&mut self.inner).headers.insert(n, v);
        }
    }

    /// Get all headers as a HashMap
    #[must_use]
    pub fn headers_map(&self) -> HashMap<String, String> {
        self.inner
            .headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|val| (k.as_str().to_string(), val.to_string()))
            })
            .collect()
    }

    /// Get a query parameter by name
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.inner.query_params.get(name).map(String::as_str)
    }

    /// Get query parameters as a HashMap
    #[must_use]
    pub fn query_map(&self) -> &HashMap<String, String> {
        &self.inner.query_params
    }

    /// Get raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.inner.query_string.as_deref()
    }

    /// Get the request body as bytes
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.inner.body.as_deref()
    }

    /// Get the request body as string (UTF-8)
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        self.body_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// Collect `body`, reading at most `limit` bytes
///
/// Stops as soon as the limit is crossed, whether or not the body announced
/// its length.
async fn collect_limited<B>(body: B, limit: usize) -> Result<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) => Err(body_error(err, limit)),
    }
}

fn body_error(err: BoxError, limit: usize) -> Error {
    if err.is::<LengthLimitError>() {
        return Error::PayloadTooLarge {
            limit,
            actual: limit.saturating_add(1),
        };
    }
    match err.downcast::<hyper::Error>() {
        Ok(err) => Error::Http(*err),
        Err(other) => Error::Io(std::io::Error::new(std::io::ErrorKind::Other, other)),
    }
}

/// Parse query string into HashMap
///
/// Handles URL decoding and duplicate keys (last value wins).
fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}
