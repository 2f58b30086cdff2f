//! Optimizer configuration: concurrency bound, cache and de-duplication defaults.

use crate::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// How high-priority requests treat the concurrency bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HighPriorityPolicy {
    /// High-priority requests start immediately, even when the bound is
    /// saturated. Sustained high-priority load can oversubscribe the bound.
    #[default]
    Bypass,
    /// High-priority requests respect the bound but are queued ahead of
    /// every normal or low priority request, in arrival order among
    /// themselves.
    JumpQueue,
}

///
/// Configuration for the API call optimizer.
///
/// # Example TOML
///
/// ```toml
/// [optimizer]
/// max_concurrent_requests = 3
/// cache_ttl = "5m"
/// enable_cache = true
/// enable_deduplication = true
/// high_priority_policy = "bypass"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    /// Maximum number of requests executing at the same time.
    /// Requests beyond this bound wait in a FIFO queue. Default: 3
    #[serde(default = "OptimizerConfig::default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Default time-to-live of cached responses. Default: 5m
    #[serde(
        default = "OptimizerConfig::default_cache_ttl",
        with = "humantime_serde"
    )]
    pub cache_ttl: Duration,

    /// Whether fetches use the response cache unless told otherwise.
    /// Default: true
    #[serde(default = "OptimizerConfig::default_true")]
    pub enable_cache: bool,

    /// Whether identical in-flight requests share a single network call
    /// unless told otherwise. Default: true
    #[serde(default = "OptimizerConfig::default_true")]
    pub enable_deduplication: bool,

    /// Admission policy for high-priority requests. Default: bypass
    #[serde(default)]
    pub high_priority_policy: HighPriorityPolicy,
}

impl OptimizerConfig {
    fn default_max_concurrent_requests() -> usize {
        3
    }

    fn default_cache_ttl() -> Duration {
        Duration::from_secs(5 * 60)
    }

    fn default_true() -> bool {
        true
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_high_priority_policy(mut self, policy: HighPriorityPolicy) -> Self {
        self.high_priority_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_requests == 0 {
            return Err(Error::config(
                "optimizer.max_concurrent_requests must be greater than 0",
            ));
        }
        if self.cache_ttl.is_zero() {
            return Err(Error::config("optimizer.cache_ttl must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: Self::default_max_concurrent_requests(),
            cache_ttl: Self::default_cache_ttl(),
            enable_cache: true,
            enable_deduplication: true,
            high_priority_policy: HighPriorityPolicy::default(),
        }
    }
}
