//! # api-optimizer
//!
//! Response caching, in-flight de-duplication and bounded-concurrency
//! dispatch for outgoing HTTP calls, configured through simple TOML.
//!
//! Dashboards and proxies tend to fire the same upstream request from many
//! places at once. [`ApiOptimizer`] sits in front of the upstream and makes
//! sure that:
//!
//! - a fresh response is served from memory instead of the network;
//! - identical requests in flight share a single call and its outcome;
//! - no more than `max_concurrent_requests` calls run at once, with a
//!   priority lane for urgent traffic.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use api_optimizer::{ApiOptimizer, ApiRequest, Config, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_rust_env_or_default(); // config/{RUST_ENV}.toml
//!     config.setup_tracing();
//!
//!     let optimizer = ApiOptimizer::from_config(&config)?;
//!     let status: serde_json::Value = optimizer
//!         .fetch_json(ApiRequest::get("/api/drone/status"), optimizer.default_options())
//!         .await?;
//!
//!     println!("{status}");
//!     Ok(())
//! }
//! ```
//!
//! With `config/dev.toml`:
//! ```toml
//! [optimizer]
//! max_concurrent_requests = 3
//! cache_ttl = "5m"
//!
//! [transport]
//! base_url = "http://localhost:8000"
//! request_timeout = "30s"
//! ```
//!
//! Run with `RUST_ENV=dev cargo run`.
//!
//! # What You Get
//!
//! | Feature | Description | Default |
//! |---------|-------------|---------|
//! | Response cache | JSON responses keyed by method, URL and body | 5 minutes |
//! | De-duplication | Identical in-flight requests share one call | Enabled |
//! | Concurrency bound | FIFO queue beyond the bound | 3 requests |
//! | Priorities | `High` bypasses or jumps the queue | Bypass |
//! | Streaming | SSE and plain-text bodies are handed over unread | Automatic |
//! | Request ids | UUIDv7 `x-request-id` on every call | Enabled |
//!
//! # Cargo Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `axum` | `IntoResponse` for [`Error`], for proxy handlers built on axum |
//!
//! # Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | `config` | Configuration loading and validation ([`Config`]) |
//! | `optimizer` | The optimizer and its layers ([`ApiOptimizer`]) |
//! | `transport` | Outgoing requests and the transport seam ([`Transport`]) |
//! | `error` | Error types and handling ([`Error`]) |
//! | `utils` | Utilities ([`Sensitive`], [`new_request_id`]) |
//!
//! # Configuration
//!
//! Configuration can be loaded from TOML files, strings, or built programmatically:
//!
//! ```rust
//! use api_optimizer::{Config, HighPriorityPolicy};
//! use std::time::Duration;
//!
//! // From string (useful for tests)
//! let config: Config = r#"
//!     [optimizer]
//!     max_concurrent_requests = 5
//!     cache_ttl = "30s"
//!     high_priority_policy = "jump-queue"
//! "#.parse().unwrap();
//! assert_eq!(config.optimizer.max_concurrent_requests, 5);
//!
//! // With builder methods
//! let config = Config::default()
//!     .with_max_concurrent_requests(8)
//!     .with_cache_ttl(Duration::from_secs(60))
//!     .with_high_priority_policy(HighPriorityPolicy::Bypass)
//!     .with_base_url("http://localhost:8000");
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Error Handling
//!
//! The library uses a custom [`Result`] type. An upstream failure keeps its
//! status, and with the `axum` feature converts into a structured JSON
//! response:
//!
//! ```json
//! {
//!   "error_code": "UPSTREAM_ERROR",
//!   "message": "HTTP 503: Service Unavailable"
//! }
//! ```
//!
//! # Custom Transports
//!
//! The optimizer only needs something that implements [`Transport`]. The
//! reqwest-backed [`HttpTransport`] is the default; tests and special
//! upstreams can plug in their own.
//!
//! ```rust,no_run
//! use api_optimizer::{ApiOptimizer, HttpTransport, OptimizerConfig, TransportConfig};
//!
//! # fn example() -> api_optimizer::Result<()> {
//! let transport = HttpTransport::new(&TransportConfig::default())?;
//! let optimizer = ApiOptimizer::new(transport, &OptimizerConfig::default());
//! # Ok(())
//! # }
//! ```
mod config;
mod error;
mod optimizer;
mod transport;
mod utils;

pub use config::*;
pub use error::*;
pub use optimizer::*;
pub use transport::*;
pub use utils::*;

/// A type alias for `Result<T, Error>` used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
