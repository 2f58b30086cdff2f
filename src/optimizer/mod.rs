//! The optimizer: cache, de-duplication and bounded dispatch around a
//! [`Transport`].
//!
//! A fetch goes through the layers in a fixed order:
//!
//! 1. the response cache, keyed by [`fingerprint`];
//! 2. the in-flight registry, where a request joins an identical call that
//!    is already executing;
//! 3. the dispatcher, which bounds how many calls run at once;
//! 4. the in-flight registry again, where the request registers as the
//!    leader once it holds a slot;
//! 5. the transport.
//!
//! A request registers only after it got a slot, so a queued call never
//! holds back a high-priority duplicate. Requests that ask for a streamed
//! answer skip the cache and the registry.

mod cache;
mod dedup;
mod dispatcher;
mod fingerprint;

pub use cache::{CacheStats, ResponseCache};
pub use dedup::{Follower, InFlightRegistry, Join, LeaderGuard};
pub use dispatcher::{DispatchPermit, Dispatcher, Priority};
pub use fingerprint::{fingerprint, hash_string};

use crate::{
    ApiRequest, Config, Error, HttpTransport, OptimizerConfig, Result, Transport,
    UpstreamResponse, new_request_id, transport::REQUEST_ID_HEADER,
};
use futures::future::{join_all, try_join_all};
use http::{HeaderName, HeaderValue};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::Instrument;

/// Per-call knobs. Start from [`FetchOptions::default()`] or from the
/// configured defaults with [`ApiOptimizer::default_options()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub enable_cache: bool,
    pub cache_ttl: Duration,
    pub enable_deduplication: bool,
    pub priority: Priority,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache_ttl: Duration::from_secs(5 * 60),
            enable_deduplication: true,
            priority: Priority::Normal,
        }
    }
}

impl From<&OptimizerConfig> for FetchOptions {
    fn from(config: &OptimizerConfig) -> Self {
        Self {
            enable_cache: config.enable_cache,
            cache_ttl: config.cache_ttl,
            enable_deduplication: config.enable_deduplication,
            priority: Priority::Normal,
        }
    }
}

impl FetchOptions {
    pub fn with_cache(mut self, enable: bool) -> Self {
        self.enable_cache = enable;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_deduplication(mut self, enable: bool) -> Self {
        self.enable_deduplication = enable;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Result of a fetch: a buffered JSON document, or the raw upstream
/// response for streaming content.
#[derive(Debug)]
pub enum ApiResponse<S> {
    Json(Value),
    Stream(S),
}

impl<S> ApiResponse<S> {
    /// Deserializes the JSON document. Fails with `InvalidInput` for a stream.
    pub fn json<D: DeserializeOwned>(self) -> Result<D> {
        match self {
            ApiResponse::Json(value) => Ok(serde_json::from_value(value)?),
            ApiResponse::Stream(_) => Err(Error::invalid_input(
                "Expected a JSON response but the upstream returned a stream",
            )),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ApiResponse::Json(value) => Some(value),
            ApiResponse::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<S> {
        match self {
            ApiResponse::Json(_) => None,
            ApiResponse::Stream(stream) => Some(stream),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, ApiResponse::Stream(_))
    }
}

/// Outcome of [`ApiOptimizer::warmup_cache()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WarmupReport {
    pub succeeded: usize,
    pub failed: usize,
}

struct Inner<T> {
    transport: T,
    cache: ResponseCache,
    inflight: InFlightRegistry,
    dispatcher: Dispatcher,
    defaults: FetchOptions,
}

/// Wraps a [`Transport`] with a response cache, in-flight de-duplication and
/// a bounded, prioritized dispatcher.
///
/// Clones share all state, so one optimizer can be handed to every task
/// that talks to the same upstream.
///
/// # Example
///
/// ```rust,no_run
/// use api_optimizer::{ApiOptimizer, ApiRequest, Config, Priority};
///
/// # async fn example() -> api_optimizer::Result<()> {
/// let config = Config::default().with_base_url("http://localhost:8000");
/// let optimizer = ApiOptimizer::from_config(&config)?;
///
/// let status: serde_json::Value = optimizer
///     .fetch_json(
///         ApiRequest::get("/api/drone/status"),
///         optimizer.default_options().with_priority(Priority::High),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ApiOptimizer<T: Transport = HttpTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for ApiOptimizer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> fmt::Debug for ApiOptimizer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiOptimizer")
            .field("max_concurrent", &self.inner.dispatcher.max_concurrent())
            .field("active", &self.inner.dispatcher.active())
            .field("queued", &self.inner.dispatcher.queued())
            .field("in_flight", &self.inner.inflight.len())
            .field("cached", &self.inner.cache.len())
            .finish()
    }
}

impl ApiOptimizer<HttpTransport> {
    /// Validates the configuration and builds an optimizer over a reqwest
    /// transport.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config.transport)?;
        Ok(Self::new(transport, &config.optimizer))
    }
}

impl<T: Transport> ApiOptimizer<T> {
    pub fn new(transport: T, config: &OptimizerConfig) -> Self {
        tracing::debug!(
            max_concurrent = config.max_concurrent_requests,
            cache_ttl = %humantime::format_duration(config.cache_ttl),
            policy = ?config.high_priority_policy,
            "Creating API optimizer"
        );

        Self {
            inner: Arc::new(Inner {
                transport,
                cache: ResponseCache::new(),
                inflight: InFlightRegistry::new(),
                dispatcher: Dispatcher::new(
                    config.max_concurrent_requests,
                    config.high_priority_policy,
                ),
                defaults: FetchOptions::from(config),
            }),
        }
    }

    /// Options built from the configured defaults.
    pub fn default_options(&self) -> FetchOptions {
        self.inner.defaults
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Fetches a request through the cache, the in-flight registry and the
    /// dispatcher.
    ///
    /// Callers that join an identical in-flight request receive a clone of
    /// its outcome, success or error, without a second network call.
    pub async fn fetch(
        &self,
        request: ApiRequest,
        options: FetchOptions,
    ) -> Result<ApiResponse<T::Response>> {
        let key = fingerprint(&request);
        let shareable = !request.wants_stream();
        let use_cache = options.enable_cache && shareable;
        let deduplicate = options.enable_deduplication && shareable;

        if use_cache && let Some(data) = self.inner.cache.lookup(&key) {
            tracing::debug!(key = %key, "Cache hit");
            return Ok(ApiResponse::Json(data));
        }

        if deduplicate && let Some(follower) = self.inner.inflight.follow(&key) {
            return follower.wait().await.map(ApiResponse::Json);
        }

        let permit = self.inner.dispatcher.acquire(options.priority).await?;

        // another caller may have filled the cache while this one was queued
        if use_cache && let Some(data) = self.inner.cache.lookup(&key) {
            tracing::debug!(key = %key, "Cache filled while queued");
            return Ok(ApiResponse::Json(data));
        }

        let leader = if deduplicate {
            match self.inner.inflight.join_or_lead(&key) {
                Join::Follower(follower) => {
                    // the slot goes to the next queued request
                    drop(permit);
                    return follower.wait().await.map(ApiResponse::Json);
                }
                Join::Leader(guard) => Some(guard),
            }
        } else {
            None
        };

        let result = self.dispatch(request, &key, use_cache, options).await;
        drop(permit);

        if let Some(guard) = leader {
            match &result {
                Ok(ApiResponse::Json(data)) => {
                    guard.settle(&Ok(data.clone()));
                }
                Ok(ApiResponse::Stream(_)) => guard.release_streaming(),
                Err(err) => {
                    guard.settle(&Err(err.clone()));
                }
            }
        }

        result
    }

    /// Fetches and deserializes a JSON response.
    pub async fn fetch_json<D: DeserializeOwned>(
        &self,
        request: ApiRequest,
        options: FetchOptions,
    ) -> Result<D> {
        self.fetch(request, options).await?.json()
    }

    /// Fetches every request concurrently and returns the responses in input
    /// order. Requests without options use [`default_options()`].
    ///
    /// The first error is returned. The remaining requests keep running in
    /// the background, so their callers sharing the same in-flight entry and
    /// the cache still get their results.
    ///
    /// [`default_options()`]: ApiOptimizer::default_options
    pub async fn batch_requests(
        &self,
        requests: Vec<(ApiRequest, Option<FetchOptions>)>,
    ) -> Result<Vec<ApiResponse<T::Response>>> {
        let handles = requests.into_iter().map(|(request, options)| {
            let optimizer = self.clone();
            let options = options.unwrap_or(self.inner.defaults);
            let handle = tokio::spawn(async move { optimizer.fetch(request, options).await });
            async move {
                handle
                    .await
                    .map_err(|err| Error::internal(format!("Batched request panicked: {err}")))?
            }
        });

        try_join_all(handles).await
    }

    /// Fetches every request at low priority to pre-populate the cache.
    /// Caching is forced on for these calls, whatever the configured default.
    /// Individual failures are counted, never returned.
    pub async fn warmup_cache(&self, requests: Vec<ApiRequest>) -> WarmupReport {
        let options = self
            .inner
            .defaults
            .with_cache(true)
            .with_priority(Priority::Low);
        let results = join_all(
            requests
                .into_iter()
                .map(|request| self.fetch(request, options)),
        )
        .await;

        let report = results.iter().fold(WarmupReport::default(), |mut report, result| {
            match result {
                Ok(_) => report.succeeded += 1,
                Err(err) => {
                    tracing::debug!(error = %err, "Cache warm-up request failed");
                    report.failed += 1;
                }
            }
            report
        });

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Cache warm-up finished"
        );
        report
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
        tracing::debug!("Response cache cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Requests currently executing.
    pub fn active_requests(&self) -> usize {
        self.inner.dispatcher.active()
    }

    /// Requests waiting for a dispatch slot.
    pub fn queued_requests(&self) -> usize {
        self.inner.dispatcher.queued()
    }

    /// Distinct de-duplicated requests in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Attaches a request id and runs the call inside its tracing span.
    /// Must be called while holding a dispatch permit.
    async fn dispatch(
        &self,
        mut request: ApiRequest,
        key: &str,
        use_cache: bool,
        options: FetchOptions,
    ) -> Result<ApiResponse<T::Response>> {
        let request_id = match request
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            Some(id) => id.to_string(),
            None => {
                let id = new_request_id();
                request.headers.insert(
                    HeaderName::from_static(REQUEST_ID_HEADER),
                    HeaderValue::from_str(&id)?,
                );
                id
            }
        };

        let span = tracing::info_span!(
            "api_request",
            method = %request.method,
            url = %request.url,
            request_id = %request_id,
        );

        self.execute(request, key, use_cache, options)
            .instrument(span)
            .await
    }

    /// Runs one call through the transport and turns the response into an
    /// [`ApiResponse`].
    async fn execute(
        &self,
        request: ApiRequest,
        key: &str,
        use_cache: bool,
        options: FetchOptions,
    ) -> Result<ApiResponse<T::Response>> {
        let started = Instant::now();
        tracing::info!("Sending request");

        let response = self.inner.transport.execute(&request).await.inspect_err(|err| {
            tracing::error!(error = %err, "Request failed");
        })?;

        let status = response.status();
        let elapsed = humantime::format_duration(truncate_to_millis(started.elapsed()));

        if !status.is_success() {
            let body = response.into_body_bytes().await.unwrap_or_default();
            let text = String::from_utf8_lossy(&body);
            tracing::warn!(
                status = status.as_u16(),
                elapsed = %elapsed,
                "Upstream returned an error status"
            );
            return Err(Error::upstream(status, text));
        }

        if response.is_streaming() || request.wants_stream() {
            tracing::info!(
                status = status.as_u16(),
                elapsed = %elapsed,
                content_type = %response.content_type(),
                "Streaming response handed to caller"
            );
            return Ok(ApiResponse::Stream(response));
        }

        let body = response.into_body_bytes().await?;
        let data: Value = serde_json::from_slice(&body).map_err(|err| {
            tracing::warn!(error = %err, "Response body is not valid JSON");
            Error::parse(format!("Invalid JSON in response: {err}"))
        })?;

        tracing::info!(
            status = status.as_u16(),
            elapsed = %elapsed,
            bytes = body.len(),
            "Request completed"
        );

        if use_cache {
            self.inner.cache.store(key, data.clone(), options.cache_ttl);
        }
        Ok(ApiResponse::Json(data))
    }
}

fn truncate_to_millis(duration: Duration) -> Duration {
    Duration::from_millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
