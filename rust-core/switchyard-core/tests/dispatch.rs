use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use switchyard::{
    cors, CorsConfig, Handler, Method, Middleware, ParamValue, RateLimit, RecordingLogger,
    Request, Response, RouteOptions, RouteTable, Router, Server,
};

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn mark(log: &Log, label: &str) -> Middleware {
    let log = Arc::clone(log);
    let label = label.to_string();
    Middleware::sync(move |_req, _res, next, _params| {
        log.lock().unwrap().push(label.clone());
        next.advance();
        Ok(())
    })
}

fn reply(log: &Log, label: &str) -> Handler {
    let log = Arc::clone(log);
    let label = label.to_string();
    Handler::sync(move |_req, res, _params| {
        log.lock().unwrap().push(label.clone());
        res.send(label.clone());
        Ok(())
    })
}

async fn dispatch(
    table: &RouteTable,
    method: &str,
    path: &str,
) -> (bool, Response, Arc<RecordingLogger>) {
    let logger = Arc::new(RecordingLogger::new());
    let request = Request::new(method, path, HashMap::new(), None);
    let response = Response::new();
    let matched = table.dispatch(&request, &response, logger.clone()).await;
    (matched, response, logger)
}

#[tokio::test]
async fn first_registered_route_wins() {
    let log = new_log();
    let mut router = Router::new();
    router.get("users/{id}", reply(&log, "by-id")).unwrap();
    router.get("users/me", reply(&log, "me")).unwrap();

    let table = RouteTable::from(router);
    let (matched, res, _) = dispatch(&table, "GET", "/users/me").await;

    assert!(matched);
    assert_eq!(res.snapshot().body, "by-id");
    assert_eq!(entries(&log), vec!["by-id"]);
}

#[tokio::test]
async fn verb_and_all_buckets_interleave_by_registration() {
    let log = new_log();
    let mut router = Router::new();
    router.all("items", reply(&log, "all")).unwrap();
    router.get("items", reply(&log, "get")).unwrap();

    let table = RouteTable::from(router);
    let (_, res, _) = dispatch(&table, "GET", "/items").await;
    assert_eq!(res.snapshot().body, "all");

    let (matched, _, _) = dispatch(&table, "BREW", "/items").await;
    assert!(matched, "unknown methods still reach the All bucket");
}

#[tokio::test]
async fn typed_params_reach_the_handler() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);

    let mut router = Router::new();
    router
        .get(
            "users/{int:userId}/posts/{int:postId}/comments",
            Handler::sync(move |_req, _res, params| {
                seen_in
                    .lock()
                    .unwrap()
                    .extend(params.values().cloned());
                Ok(())
            }),
        )
        .unwrap();

    let table = RouteTable::from(router);
    let (matched, _, _) = dispatch(&table, "GET", "/Users/1/Posts/4/Comments/").await;

    assert!(matched);
    assert_eq!(*seen.lock().unwrap(), vec![ParamValue::Int(1), ParamValue::Int(4)]);
}

#[tokio::test]
async fn optional_and_repeat_groups() {
    let log = new_log();
    let mut router = Router::new();
    router.get("docs/(page/{int:n})?", reply(&log, "docs")).unwrap();
    router.get("tags/[t/{tag}]+", reply(&log, "tags")).unwrap();

    let table = RouteTable::from(router);
    assert!(dispatch(&table, "GET", "/docs").await.0);
    assert!(dispatch(&table, "GET", "/docs/page/2").await.0);
    assert!(dispatch(&table, "GET", "/tags/t/a/t/b").await.0);
    assert!(!dispatch(&table, "GET", "/tags").await.0);
}

#[tokio::test]
async fn global_middlewares_run_before_local_and_handler() {
    let log = new_log();
    let mut router = Router::new();
    router.use_middleware("*", mark(&log, "global"), ()).unwrap();
    router
        .use_middleware("admin/*", mark(&log, "admin"), ())
        .unwrap();
    router
        .route(
            Method::Get,
            "api/users",
            reply(&log, "handler"),
            RouteOptions::new().middleware(mark(&log, "local")),
        )
        .unwrap();

    let table = RouteTable::from(router);
    assert!(dispatch(&table, "GET", "/api/users").await.0);
    assert_eq!(entries(&log), vec!["global", "local", "handler"]);
}

#[tokio::test]
async fn middleware_method_filter() {
    let log = new_log();
    let mut router = Router::new();
    router
        .use_middleware("*", mark(&log, "writes"), ["POST", "PUT"])
        .unwrap();
    router.all("things", reply(&log, "handler")).unwrap();

    let table = RouteTable::from(router);
    dispatch(&table, "GET", "/things").await;
    dispatch(&table, "put", "/things").await;
    assert_eq!(entries(&log), vec!["handler", "writes", "handler"]);
}

#[tokio::test]
async fn short_circuit_still_counts_as_matched() {
    let handled = Arc::new(AtomicUsize::new(0));
    let handled_in = Arc::clone(&handled);

    let mut router = Router::new();
    router
        .use_middleware(
            "*",
            Middleware::sync(|_req, res, _next, _params| {
                res.set_status(401).send("denied");
                Ok(())
            }),
            (),
        )
        .unwrap();
    router
        .get(
            "secret",
            Handler::sync(move |_req, _res, _params| {
                handled_in.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

    let table = RouteTable::from(router);
    let (matched, res, logger) = dispatch(&table, "GET", "/secret").await;

    assert!(matched);
    assert_eq!(res.status(), 401);
    assert_eq!(handled.load(Ordering::SeqCst), 0);
    assert!(logger.is_empty());
}

#[tokio::test]
async fn async_middleware_advances_later() {
    let log = new_log();
    let mut router = Router::new();
    router
        .use_middleware(
            "*",
            Middleware::future(|_req, res, next, _params| async move {
                tokio::task::yield_now().await;
                res.set_header("x-async", "1");
                next.advance();
                Ok(())
            }),
            (),
        )
        .unwrap();
    router.get("a", reply(&log, "handler")).unwrap();

    let table = RouteTable::from(router);
    let (matched, res, _) = dispatch(&table, "GET", "/a").await;
    assert!(matched);
    assert_eq!(res.header("x-async").as_deref(), Some("1"));
    assert_eq!(entries(&log), vec!["handler"]);
}

#[tokio::test]
async fn failing_middleware_is_logged_and_aborts() {
    let log = new_log();
    let mut router = Router::new();
    router
        .use_middleware(
            "*",
            Middleware::sync(|_req, _res, _next, _params| {
                Err(anyhow::anyhow!("session store down"))
            }),
            (),
        )
        .unwrap();
    router.get("a", reply(&log, "handler")).unwrap();

    let table = RouteTable::from(router);
    let (matched, _, logger) = dispatch(&table, "GET", "/a").await;

    assert!(matched);
    assert!(entries(&log).is_empty());
    assert_eq!(logger.len(), 1);
    assert!(logger.entries()[0].contains("session store down"));
}

#[tokio::test]
async fn mounted_routes_are_prefixed_and_inherit() {
    let log = new_log();

    let mut api = Router::new();
    api.use_middleware("*", mark(&log, "api-mw"), ()).unwrap();
    api.get("users/{int:id}", reply(&log, "api-user")).unwrap();

    let mut root = Router::new();
    root.use_middleware("*", mark(&log, "root-mw"), ()).unwrap();
    root.mount("api/v1", api).unwrap();

    let table = RouteTable::from(root);
    assert!(dispatch(&table, "GET", "/api/v1/users/7").await.0);
    assert_eq!(entries(&log), vec!["root-mw", "api-mw", "api-user"]);

    assert!(!dispatch(&table, "GET", "/users/7").await.0);
}

#[tokio::test]
async fn non_inheriting_mount_skips_parent_middlewares() {
    let log = new_log();

    let mut public = Router::new().inherit_middlewares(false);
    public.get("health", reply(&log, "health")).unwrap();

    let mut root = Router::new();
    root.use_middleware("*", mark(&log, "auth"), ()).unwrap();
    root.get("private", reply(&log, "private")).unwrap();
    root.mount("public", public).unwrap();

    let table = RouteTable::from(root);
    dispatch(&table, "GET", "/public/health").await;
    dispatch(&table, "GET", "/private").await;
    assert_eq!(entries(&log), vec!["health", "auth", "private"]);
}

#[tokio::test]
async fn server_round_trip_with_builtins() {
    let mut router = Router::new();
    router
        .use_middleware(
            "*",
            vec![
                cors(CorsConfig::new().allow_origin("https://example.com")),
                RateLimit::new(1, 0).into_middleware(),
            ],
            (),
        )
        .unwrap();
    router
        .get(
            "ping",
            Handler::sync(|_req, res, _params| {
                res.json(&serde_json::json!({"pong": true}))?;
                Ok(())
            }),
        )
        .unwrap();

    let server = Server::new(router);

    let first = server.test_request("GET", "/ping", HashMap::new(), None).await;
    assert_eq!(first.status, 200);
    assert_eq!(first.body, r#"{"pong":true}"#);
    assert_eq!(
        first.headers.get("access-control-allow-origin").map(String::as_str),
        Some("https://example.com")
    );

    let second = server.test_request("GET", "/ping", HashMap::new(), None).await;
    assert_eq!(second.status, 429);

    let missing = server.test_request("GET", "/nope", HashMap::new(), None).await;
    assert_eq!(missing.status, 404);
    assert!(missing.headers.contains_key("x-request-id"));
}
