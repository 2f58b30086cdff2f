//! Error types for the optimizer, its transport and its configuration.
//!
//! This module provides structured errors with stable error codes and an
//! HTTP status mapping, so proxy handlers can forward failures to their own
//! clients without inspecting the underlying cause.
//!
//! # Design
//!
//! This module uses an opaque `Error` struct paired with an `ErrorKind` enum,
//! following the `std::io::Error` pattern. Unlike `std::io::Error` the source
//! is reference counted, which makes `Error` cheap to clone: a single upstream
//! failure is delivered to every caller that was waiting on the same request.
//!
//! # Example
//!
//! ```rust
//! use api_optimizer::{Error, ErrorKind};
//! use http::StatusCode;
//!
//! let error = Error::upstream(StatusCode::NOT_FOUND, "no such drone");
//!
//! match error.kind() {
//!     ErrorKind::Upstream => println!("upstream said: {}", error),
//!     ErrorKind::Transport => println!("network failure: {}", error),
//!     _ => println!("other error: {}", error),
//! }
//!
//! assert_eq!(error.to_string(), "HTTP 404: no such drone");
//! assert_eq!(error.upstream_status(), Some(StatusCode::NOT_FOUND));
//! ```

use http::StatusCode;
use serde::Serialize;
use std::{fmt, sync::Arc};
use thiserror::Error;

/// The kind of error that occurred.
///
/// This enum is marked `#[non_exhaustive]`, so new variants may be added
/// without breaking existing code. Always include a wildcard arm when matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The transport could not complete the call (DNS, connect, timeout).
    #[error("transport error")]
    Transport,

    /// The upstream answered with a non-2xx status.
    #[error("upstream error")]
    Upstream,

    /// A buffered response body was not valid JSON.
    #[error("parse error")]
    Parse,

    /// A de-duplicated caller could not receive the shared result.
    #[error("deduplication error")]
    Deduplication,

    /// Configuration error (invalid TOML, missing values).
    #[error("configuration error")]
    Configuration,

    /// I/O error (reading configuration files).
    #[error("I/O error")]
    Io,

    /// Invalid input (bad URL, header, method or response shape).
    #[error("invalid input")]
    InvalidInput,

    /// Internal/unexpected error.
    #[error("internal error")]
    Internal,
}

/// A non-2xx answer from the upstream service.
///
/// `body` holds the upstream response text, or the canonical reason phrase
/// when the upstream sent an empty body.
#[derive(Debug, Clone, Error)]
#[error("HTTP {}: {body}", .status.as_u16())]
pub struct UpstreamError {
    pub status: StatusCode,
    pub body: String,
}

/// An error raised while fetching through the optimizer.
///
/// Use [`Error::kind()`] to determine the category of error and the `Display`
/// implementation for a human-readable message.
///
/// ```rust
/// use api_optimizer::{Error, ErrorKind};
///
/// let err = Error::new(ErrorKind::Internal, "something went wrong");
/// let copy = err.clone();
/// assert_eq!(copy.kind(), ErrorKind::Internal);
/// assert_eq!(copy.to_string(), err.to_string());
/// ```
#[derive(Clone)]
pub struct Error {
    kind: ErrorKind,
    status: Option<StatusCode>,
    source: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

impl Error {
    /// Creates a new error with the given kind and source.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self {
            kind,
            status: None,
            source: Arc::from(error.into()),
        }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the status the upstream answered with, for `Upstream` errors.
    pub fn upstream_status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Returns the error code string for this error.
    ///
    /// This is a stable identifier suitable for client-side error handling.
    pub fn error_code(&self) -> &'static str {
        match self.kind {
            ErrorKind::Transport => "TRANSPORT_ERROR",
            ErrorKind::Upstream => "UPSTREAM_ERROR",
            ErrorKind::Parse => "PARSE_ERROR",
            ErrorKind::Deduplication => "DEDUPLICATION_ERROR",
            ErrorKind::Configuration => "CONFIG_ERROR",
            ErrorKind::Io => "IO_ERROR",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code a proxy should answer with for this error.
    ///
    /// Upstream errors keep the upstream status.
    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Upstream => self.status.unwrap_or(StatusCode::BAD_GATEWAY),
            ErrorKind::Transport => StatusCode::BAD_GATEWAY,
            ErrorKind::Parse => StatusCode::BAD_GATEWAY,
            ErrorKind::Deduplication => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Converts the error into a structured error response.
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse::new(self.error_code(), self.to_string())
    }

    /// Returns the shared inner error source.
    pub fn into_inner(self) -> Arc<dyn std::error::Error + Send + Sync + 'static> {
        self.source
    }
}

// ============================================================================
// Convenience constructors
// ============================================================================

impl Error {
    /// Creates an upstream error from a non-2xx status and the response text.
    ///
    /// An empty body is replaced by the status' canonical reason phrase.
    pub fn upstream(status: StatusCode, body: impl Into<String>) -> Self {
        let body = body.into();
        let body = if body.is_empty() {
            status.canonical_reason().unwrap_or_default().to_string()
        } else {
            body
        };
        Self {
            status: Some(status),
            ..Self::new(ErrorKind::Upstream, UpstreamError { status, body })
        }
    }

    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, msg.into())
    }

    /// Creates a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, msg.into())
    }

    /// Creates a deduplication error.
    pub fn deduplication(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Deduplication, msg.into())
    }

    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, msg.into())
    }

    /// Creates an I/O error from a message.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, msg.into())
    }

    /// Creates an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, msg.into())
    }

    /// Creates an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg.into())
    }
}

// ============================================================================
// Trait implementations
// ============================================================================

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let error_response = self.to_error_response();

        tracing::error!(
            error_code = %error_response.error_code,
            message = %error_response.message,
            status = %status.as_u16(),
            "Error occurred"
        );

        (status, axum::Json(error_response)).into_response()
    }
}

// ============================================================================
// From implementations
// ============================================================================

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::new(ErrorKind::Configuration, err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::new(ErrorKind::InvalidInput, err)
    }
}

impl From<std::env::VarError> for Error {
    fn from(err: std::env::VarError) -> Self {
        Self::new(ErrorKind::Configuration, err)
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::new(ErrorKind::InvalidInput, err)
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::new(ErrorKind::InvalidInput, err)
    }
}

impl From<http::method::InvalidMethod> for Error {
    fn from(err: http::method::InvalidMethod) -> Self {
        Self::new(ErrorKind::InvalidInput, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Parse, err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::new(ErrorKind::Parse, err)
        } else {
            Self::new(ErrorKind::Transport, err)
        }
    }
}

// ============================================================================
// ErrorResponse
// ============================================================================

/// Structured error response with error code and details.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Unique error code for client-side error handling.
    pub error_code: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Creates a new error response.
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Adds details to the error response.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
