//! Outgoing requests and the transport seam the optimizer calls through.
//!
//! The optimizer never talks to the network itself. It hands an
//! [`ApiRequest`] to a [`Transport`] and inspects the [`UpstreamResponse`]
//! it gets back. [`HttpTransport`] is the reqwest-backed implementation;
//! tests plug in scripted transports instead.

mod client;

pub use client::HttpTransport;

use crate::Result;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header::CONTENT_TYPE};
use serde_json::Value;
use std::{borrow::Cow, future::Future};

/// Header carrying the id attached to every outgoing call.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Body of an outgoing request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Sent verbatim.
    Text(String),
    /// Sent as compact JSON with `content-type: application/json`.
    Json(Value),
}

impl RequestBody {
    /// The body as it goes over the wire, which is also the form that is
    /// fingerprinted. JSON objects serialize with sorted keys.
    pub fn as_canonical_string(&self) -> Cow<'_, str> {
        match self {
            RequestBody::Empty => Cow::Borrowed(""),
            RequestBody::Text(text) => Cow::Borrowed(text),
            RequestBody::Json(value) => Cow::Owned(value.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }
}

/// An outgoing HTTP call: method, target URL, headers and body.
///
/// ```
/// use api_optimizer::ApiRequest;
/// use serde_json::json;
///
/// let request = ApiRequest::post("/api/chat")
///     .json(json!({ "model": "qwen-plus", "stream": true }));
///
/// assert!(request.wants_stream());
/// ```
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Absolute URL, or a path resolved against the transport's base URL.
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Adds a header, replacing any previous value with the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Adds a header from strings, validating both name and value.
    pub fn try_header(self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        Ok(self.header(name, value))
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = RequestBody::Text(body.into());
        self
    }

    /// True when the JSON body asks the upstream for a streamed answer
    /// (`"stream": true`, as chat completion APIs expect).
    pub fn wants_stream(&self) -> bool {
        match &self.body {
            RequestBody::Json(value) => value.get("stream").and_then(Value::as_bool) == Some(true),
            _ => false,
        }
    }
}

/// A response as returned by a [`Transport`], before the body is read.
pub trait UpstreamResponse: Send + 'static {
    fn status(&self) -> StatusCode;

    fn headers(&self) -> &HeaderMap;

    /// Canonical reason phrase of the status, empty for unknown codes.
    fn status_text(&self) -> &'static str {
        self.status().canonical_reason().unwrap_or_default()
    }

    /// Reads the whole body.
    fn into_body_bytes(self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn content_type(&self) -> &str {
        self.headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    }

    /// Server-sent events and plain text bodies are handed to the caller
    /// unread.
    fn is_streaming(&self) -> bool {
        let content_type = self.content_type();
        content_type.contains("text/event-stream") || content_type.contains("text/plain")
    }
}

/// Executes one HTTP call. Timeouts, TLS and connection pooling are the
/// transport's business.
pub trait Transport: Send + Sync + 'static {
    type Response: UpstreamResponse;

    fn execute(&self, request: &ApiRequest) -> impl Future<Output = Result<Self::Response>> + Send;
}

impl UpstreamResponse for reqwest::Response {
    fn status(&self) -> StatusCode {
        reqwest::Response::status(self)
    }

    fn headers(&self) -> &HeaderMap {
        reqwest::Response::headers(self)
    }

    async fn into_body_bytes(self) -> Result<Vec<u8>> {
        Ok(self.bytes().await?.to_vec())
    }
}
