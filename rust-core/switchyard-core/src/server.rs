//! # HTTP Server
//!
//! Hyper/Tokio front end for a [`Router`]. The router is frozen into a
//! [`RouteTable`] when the server is built and shared by every connection.
//!
//! ## Key Features
//!
//! - One dispatch engine per request
//! - Graceful shutdown on CTRL+C with connection draining
//! - Request ids generated when absent and echoed back
//! - Body size limit enforced before dispatch

use crate::error::{Error, Result};
use crate::logger::{Logger, TracingLogger};
use crate::request::Request;
use crate::response::{Response, ResponseParts};
use crate::router::{RouteTable, Router};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Header carrying the per-request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header carrying the peer address, set by the server
pub const CLIENT_IP_HEADER: &str = "x-client-ip";

/// HTTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

/// HTTP server dispatching into a route table
pub struct Server {
    config: ServerConfig,
    table: Arc<RouteTable>,
    logger: Arc<dyn Logger>,
}

impl Server {
    /// Freeze `router` and build a server with default configuration
    #[must_use]
    pub fn new(router: Router) -> Self {
        Self::with_config(router, ServerConfig::default())
    }

    /// Freeze `router` and build a server with `config`
    #[must_use]
    pub fn with_config(router: Router, config: ServerConfig) -> Self {
        Self {
            config,
            table: Arc::new(RouteTable::from(router)),
            logger: Arc::new(TracingLogger),
        }
    }

    /// Bind the server to an address
    #[must_use]
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.address = addr;
        self
    }

    /// Set max request body size
    pub fn set_max_body_size(&mut self, bytes: usize) {
        self.config.max_body_size = bytes;
    }

    /// Replace the sink for uncaught dispatch errors
    pub fn set_logger(&mut self, logger: Arc<dyn Logger>) {
        self.logger = logger;
    }

    /// Current configuration
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start the server with graceful shutdown
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` if the listener cannot be set up.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.address;
        let listener = listen(addr).map_err(|source| Error::BindError {
            address: addr.to_string(),
            source,
        })?;

        info!("Server listening on http://{}", addr);

        let active = Arc::new(AtomicUsize::new(0));
        let max_body_size = self.config.max_body_size;
        let keep_alive = self.config.keep_alive;

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = match accept_result {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!("Failed to accept connection: {}", err);
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);

                    let table = Arc::clone(&self.table);
                    let logger = Arc::clone(&self.logger);
                    let active = Arc::clone(&active);

                    tokio::task::spawn(async move {
                        active.fetch_add(1, Ordering::Relaxed);

                        let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                            let table = Arc::clone(&table);
                            let logger = Arc::clone(&logger);
                            async move {
                                let method = req.method().clone();
                                let path = req.uri().path().to_string();
                                let version = format!("{:?}", req.version());

                                let resp = handle_request(
                                    req,
                                    &table,
                                    logger,
                                    remote_addr,
                                    max_body_size,
                                )
                                .await;
                                info!("    {} - \"{} {} {}\" {}",
                                    remote_addr,
                                    method,
                                    path,
                                    version,
                                    resp.status()
                                );
                                Ok::<_, hyper::Error>(resp)
                            }
                        });

                        if let Err(err) = http1::Builder::new()
                            .keep_alive(keep_alive)
                            .serve_connection(io, service)
                            .await
                        {
                            error!("Error serving connection: {:?}", err);
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = shutdown_signal() => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            warn!(
                remaining = active.load(Ordering::Relaxed),
                "Shutdown timeout elapsed with open connections"
            );
        }
        Ok(())
    }

    /// Execute a test request directly without network stack
    pub async fn test_request(
        &self,
        method: &str,
        path: &str,
        headers: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> ResponseParts {
        if let Some(actual) = body.as_ref().map(Bytes::len) {
            if actual > self.config.max_body_size {
                return payload_too_large(self.config.max_body_size, actual);
            }
        }
        let mut req = Request::new(method, path, headers, body);
        req.set_header(CLIENT_IP_HEADER, "test");

        process_request(req, &self.table, Arc::clone(&self.logger)).await
    }
}

fn listen(addr: SocketAddr) -> std::io::Result<tokio::net::TcpListener> {
    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4()?
    } else {
        tokio::net::TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(not(windows))]
    {
        socket.set_reuseport(true)?;
    }
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler: {}", err);
        std::future::pending::<()>().await;
    }
}

/// Core request processing logic (network agnostic)
async fn process_request(
    mut req: Request,
    table: &RouteTable,
    logger: Arc<dyn Logger>,
) -> ResponseParts {
    let request_id = match req.header(REQUEST_ID_HEADER) {
        Some(id) => id.to_string(),
        None => {
            let id = generate_request_id();
            req.set_header(REQUEST_ID_HEADER, &id);
            id
        }
    };

    let response = Response::new();
    let matched = table.dispatch(&req, &response, logger).await;

    let mut parts = if matched {
        response.snapshot()
    } else {
        debug!(method = %req.method(), path = %req.path(), "No route matched");
        json_error(404, "Not Found")
    };
    parts
        .headers
        .insert(REQUEST_ID_HEADER.to_string(), request_id);
    parts
}

async fn handle_request(
    req: hyper::Request<hyper::body::Incoming>,
    table: &RouteTable,
    logger: Arc<dyn Logger>,
    remote_addr: SocketAddr,
    max_body_size: usize,
) -> hyper::Response<Full<Bytes>> {
    let mut request = match Request::from_hyper_with_limit(req, max_body_size).await {
        Ok(r) => r,
        Err(Error::PayloadTooLarge { limit, actual }) => {
            return Response::from(payload_too_large(limit, actual)).into_hyper();
        }
        Err(e) => {
            error!("Failed to parse request: {}", e);
            return Response::from(json_error(StatusCode::BAD_REQUEST.as_u16(), "Bad Request"))
                .into_hyper();
        }
    };

    request.set_header(CLIENT_IP_HEADER, &remote_addr.ip().to_string());
    Response::from(process_request(request, table, logger).await).into_hyper()
}

fn json_error(status: u16, message: &str) -> ResponseParts {
    ResponseParts {
        status,
        body: json!({ "error": message }).to_string(),
        content_type: "application/json".to_string(),
        headers: HashMap::new(),
        finished: true,
    }
}

fn payload_too_large(limit: usize, actual: usize) -> ResponseParts {
    warn!(limit, actual, "Rejected oversized request body");
    json_error(StatusCode::PAYLOAD_TOO_LARGE.as_u16(), "Payload Too Large")
}

static REQUEST_COUNTER: AtomicUsize = AtomicUsize::new(1);

fn generate_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", now.as_nanos(), counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Handler;

    fn hello_router() -> Router {
        let mut router = Router::new();
        router
            .get(
                "hello/{name}",
                Handler::sync(|_req, res, params| {
                    res.send(format!("hello {}", params.get_str("name").unwrap_or("?")));
                    Ok(())
                }),
            )
            .unwrap();
        router
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address.port(), 8000);
        assert!(config.keep_alive);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.max_body_size, 1024 * 1024);
    }

    #[test]
    fn test_bind_overrides_address() {
        let server = Server::new(Router::new()).bind(([0, 0, 0, 0], 9000).into());
        assert_eq!(server.config().address.port(), 9000);
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(generate_request_id(), generate_request_id());
    }

    #[tokio::test]
    async fn test_matched_request() {
        let server = Server::new(hello_router());
        let resp = server
            .test_request("GET", "/hello/World", HashMap::new(), None)
            .await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "hello world");
        assert!(resp.headers.contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_unmatched_is_json_404() {
        let server = Server::new(hello_router());
        let resp = server.test_request("POST", "/hello/x", HashMap::new(), None).await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.content_type, "application/json");
        let body: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
        assert_eq!(body["error"], "Not Found");
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let server = Server::new(hello_router());
        let headers = HashMap::from([(REQUEST_ID_HEADER.to_string(), "abc-123".to_string())]);
        let resp = server.test_request("GET", "/nowhere", headers, None).await;
        assert_eq!(resp.headers.get(REQUEST_ID_HEADER).map(String::as_str), Some("abc-123"));
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let mut server = Server::new(hello_router());
        server.set_max_body_size(4);
        let resp = server
            .test_request("GET", "/hello/a", HashMap::new(), Some(Bytes::from_static(b"12345")))
            .await;
        assert_eq!(resp.status, 413);
    }
}
