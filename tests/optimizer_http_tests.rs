//! Integration tests for the optimizer over real HTTP
//!
//! These tests start an axum upstream on a random port and drive the
//! reqwest-backed `HttpTransport` against it over loopback.
//!
//! ## Test Coverage
//!
//! - `test_relative_url_resolves_against_base_url`: Relative paths are joined onto
//!   `transport.base_url`
//! - `test_concurrent_identical_requests_hit_upstream_once`: In-flight de-duplication
//!   across real network latency
//! - `test_cached_response_skips_upstream`: A second fetch within the TTL is served locally
//! - `test_upstream_error_keeps_status_and_body`: Non-2xx answers become `Upstream` errors
//! - `test_event_stream_is_returned_unread`: SSE responses are handed to the caller raw
//! - `test_outgoing_headers`: Bearer token, request id, default headers and user agent
//! - `test_connection_refused_is_transport_error`: Network failures map to `Transport`

use api_optimizer::{
    ApiOptimizer, ApiRequest, Config, ErrorKind, FetchOptions, HttpTransport, REQUEST_ID_HEADER,
};
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::{get, post},
};
use futures::future::join_all;
use serde_json::{Value, json};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::net::TcpListener;

/// Counts how often the upstream was actually called.
#[derive(Clone, Default)]
struct Upstream {
    status_hits: Arc<AtomicUsize>,
}

impl Upstream {
    fn status_hits(&self) -> usize {
        self.status_hits.load(Ordering::SeqCst)
    }
}

async fn drone_status(State(upstream): State<Upstream>) -> Json<Value> {
    upstream.status_hits.fetch_add(1, Ordering::SeqCst);
    // slow enough for concurrent callers to overlap
    tokio::time::sleep(Duration::from_millis(100)).await;
    Json(json!({ "battery": 87, "altitude": 120.5 }))
}

async fn detector_offline() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "detector offline")
}

async fn empty_failure() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn events() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/event-stream")],
        "data: hello\n\ndata: world\n\n",
    )
}

async fn html() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/html")], "<html></html>")
}

async fn echo_headers(headers: HeaderMap) -> Json<Value> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "authorization": get("authorization"),
        "request_id": get("x-request-id"),
        "client": get("x-client"),
        "user_agent": get("user-agent"),
    }))
}

async fn chat(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({ "echo": body }))
}

/// Start an upstream on a random port and return its port and state
async fn start_upstream() -> (u16, Upstream) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let port = listener.local_addr().unwrap().port();

    let upstream = Upstream::default();
    let app = Router::new()
        .route("/api/drone/status", get(drone_status))
        .route("/api/detection/status", get(detector_offline))
        .route("/api/empty-failure", get(empty_failure))
        .route("/api/events", get(events))
        .route("/api/html", get(html))
        .route("/api/headers", get(echo_headers))
        .route("/api/chat", post(chat))
        .with_state(upstream.clone());

    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("Upstream failed to run");
    });

    (port, upstream)
}

fn config_for(port: u16) -> Config {
    let toml_str = format!(
        r#"
[optimizer]
max_concurrent_requests = 3
cache_ttl = "1m"

[transport]
base_url = "http://127.0.0.1:{port}"
request_timeout = "5s"
user_agent = "optimizer-tests"
bearer_token = "secret-token"

[transport.default_headers]
x-client = "dashboard"

[logging]
format = "json"
        "#
    );
    toml_str.parse().expect("Failed to parse test config TOML")
}

fn optimizer_for(port: u16) -> ApiOptimizer<HttpTransport> {
    ApiOptimizer::from_config(&config_for(port)).expect("Failed to build optimizer")
}

#[tokio::test]
async fn test_relative_url_resolves_against_base_url() {
    let (port, _upstream) = start_upstream().await;
    let optimizer = optimizer_for(port);

    let status: Value = optimizer
        .fetch_json(ApiRequest::get("/api/drone/status"), FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(status["battery"], 87);
}

#[tokio::test]
async fn test_concurrent_identical_requests_hit_upstream_once() {
    let (port, upstream) = start_upstream().await;
    let optimizer = optimizer_for(port);

    let results = join_all((0..5).map(|_| {
        optimizer.fetch(ApiRequest::get("/api/drone/status"), FetchOptions::default())
    }))
    .await;

    for result in results {
        let response = result.unwrap();
        assert_eq!(response.as_json().unwrap()["altitude"], 120.5);
    }
    assert_eq!(upstream.status_hits(), 1);
}

#[tokio::test]
async fn test_cached_response_skips_upstream() {
    let (port, upstream) = start_upstream().await;
    let optimizer = optimizer_for(port);

    for _ in 0..3 {
        optimizer
            .fetch(ApiRequest::get("/api/drone/status"), FetchOptions::default())
            .await
            .unwrap();
    }
    assert_eq!(upstream.status_hits(), 1);
    assert_eq!(optimizer.cache_stats().count, 1);

    optimizer.clear_cache();
    optimizer
        .fetch(ApiRequest::get("/api/drone/status"), FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(upstream.status_hits(), 2);
}

#[tokio::test]
async fn test_upstream_error_keeps_status_and_body() {
    let (port, _upstream) = start_upstream().await;
    let optimizer = optimizer_for(port);

    let err = optimizer
        .fetch(ApiRequest::get("/api/detection/status"), FetchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert_eq!(err.upstream_status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(err.to_string(), "HTTP 503: detector offline");

    let err = optimizer
        .fetch(ApiRequest::get("/api/empty-failure"), FetchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "HTTP 500: Internal Server Error");
}

#[tokio::test]
async fn test_event_stream_is_returned_unread() {
    let (port, _upstream) = start_upstream().await;
    let optimizer = optimizer_for(port);

    let response = optimizer
        .fetch(ApiRequest::get("/api/events"), FetchOptions::default())
        .await
        .unwrap();
    assert!(response.is_stream());

    let body = response.into_stream().unwrap().text().await.unwrap();
    assert_eq!(body, "data: hello\n\ndata: world\n\n");
    assert_eq!(optimizer.cache_stats().count, 0);
}

#[tokio::test]
async fn test_non_json_body_is_parse_error() {
    let (port, _upstream) = start_upstream().await;
    let optimizer = optimizer_for(port);

    let err = optimizer
        .fetch(ApiRequest::get("/api/html"), FetchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
}

#[tokio::test]
async fn test_outgoing_headers() {
    let (port, _upstream) = start_upstream().await;
    let optimizer = optimizer_for(port);

    let seen: Value = optimizer
        .fetch_json(
            ApiRequest::get("/api/headers"),
            FetchOptions::default().with_cache(false),
        )
        .await
        .unwrap();
    assert_eq!(seen["authorization"], "Bearer secret-token");
    assert_eq!(seen["client"], "dashboard");
    assert_eq!(seen["user_agent"], "optimizer-tests");
    assert_eq!(seen["request_id"].as_str().unwrap().len(), 36);

    let seen: Value = optimizer
        .fetch_json(
            ApiRequest::get("/api/headers")
                .try_header("authorization", "Bearer caller-token")
                .unwrap()
                .try_header(REQUEST_ID_HEADER, "caller-request")
                .unwrap(),
            FetchOptions::default().with_cache(false),
        )
        .await
        .unwrap();
    assert_eq!(seen["authorization"], "Bearer caller-token");
    assert_eq!(seen["request_id"], "caller-request");
}

#[tokio::test]
async fn test_json_body_is_posted() {
    let (port, _upstream) = start_upstream().await;
    let optimizer = optimizer_for(port);

    let reply: Value = optimizer
        .fetch_json(
            ApiRequest::post("/api/chat").json(json!({ "model": "qwen-plus", "q": "status?" })),
            FetchOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(reply["echo"]["model"], "qwen-plus");
}

#[tokio::test]
async fn test_batch_over_http_keeps_order() {
    let (port, upstream) = start_upstream().await;
    let optimizer = optimizer_for(port);

    let responses = optimizer
        .batch_requests(vec![
            (ApiRequest::get("/api/drone/status"), None),
            (
                ApiRequest::post("/api/chat").json(json!({ "n": 1 })),
                None,
            ),
            (ApiRequest::get("/api/drone/status"), None),
        ])
        .await
        .unwrap();

    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].as_json().unwrap()["battery"], 87);
    assert_eq!(responses[1].as_json().unwrap()["echo"]["n"], 1);
    assert_eq!(upstream.status_hits(), 1);
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    // Reserve a port and release it so nothing is listening there
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let optimizer = optimizer_for(port);
    let err = optimizer
        .fetch(ApiRequest::get("/api/drone/status"), FetchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(optimizer.active_requests(), 0);
}
