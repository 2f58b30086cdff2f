//!
//! Configuration structures and utilities for wiring up the optimizer.
//!
//! A configuration can be created in many ways:
//! - From an environment-specific TOML file via `Config::from_rust_env` or `Config::from_toml_file`
//! - From a TOML string via `Config::from_toml`
//! - Constructed programmatically via the builder methods on `Config`
//!
//! In both TOML-based methods, environment variables can be referenced in the TOML
//! using the {{ VAR_NAME }} syntax, and they will be substituted with the corresponding
//! environment variable value. This is done via the `replace_handlebars_with_env`
//! function and keeps API keys for the upstream services out of the TOML files.
//!
//! Configuration is split into logical sections, each represented by their own struct:
//!
//! - `OptimizerConfig` for the cache, de-duplication and concurrency settings
//! - `TransportConfig` for the HTTP client settings
//! - `LoggingConfig` for logging and tracing settings
//!
mod logging;
mod optimizer;
mod transport;

pub use logging::*;
pub use optimizer::*;
pub use transport::*;

use {
    crate::{Error, Result, utils::replace_handlebars_with_env},
    serde::Deserialize,
    std::{env, fs, str::FromStr, time::Duration},
};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    ///
    /// Loads the configuration from a file based on the RUST_ENV environment variable.
    /// Fails if RUST_ENV is not set or the file cannot be read.
    ///
    pub fn from_rust_env() -> Result<Config> {
        Self::from_toml_file(env::var("RUST_ENV")?)
    }

    ///
    /// Like `from_rust_env` but falls back to the built-in defaults when no
    /// environment-specific file is available.
    ///
    pub fn from_rust_env_or_default() -> Config {
        match Self::from_rust_env() {
            Ok(config) => config,
            Err(err) => {
                tracing::debug!(error = %err, "No environment configuration, using defaults");
                Config::default()
            }
        }
    }

    ///
    /// Given an environment name, loads the corresponding configuration file,
    /// substitutes any environment variables, and returns a Config struct.
    /// The configuration file is expected to be located at "config/{env}.toml"
    /// where {env} is the provided environment name (e.g., "dev", "prod").
    ///
    pub fn from_toml_file(env: impl AsRef<str>) -> Result<Config> {
        let path = format!("config/{}.toml", env.as_ref());
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    ///
    /// Parses a configuration string in TOML format into a Config struct.
    ///
    pub fn from_toml(toml_str: &str) -> Result<Config> {
        toml_str.parse()
    }

    /// Sets the concurrency bound of the OptimizerConfig.
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.optimizer.max_concurrent_requests = max;
        self
    }

    /// Sets the default cache time-to-live of the OptimizerConfig.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.optimizer.cache_ttl = ttl;
        self
    }

    /// Enables or disables response caching by default.
    pub fn with_cache_enabled(mut self, enable: bool) -> Self {
        self.optimizer.enable_cache = enable;
        self
    }

    /// Enables or disables in-flight de-duplication by default.
    pub fn with_deduplication_enabled(mut self, enable: bool) -> Self {
        self.optimizer.enable_deduplication = enable;
        self
    }

    /// Sets how high-priority requests treat the concurrency bound.
    pub fn with_high_priority_policy(mut self, policy: HighPriorityPolicy) -> Self {
        self.optimizer.high_priority_policy = policy;
        self
    }

    /// Sets the base URL relative request URLs are resolved against.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.transport.base_url = Some(base_url.into());
        self
    }

    /// Sets the transport-level request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.transport.request_timeout = Some(timeout);
        self
    }

    /// Sets the log format of the LoggingConfig.
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.logging.format = format;
        self
    }

    /// Ensures that the configuration is valid.
    /// Every value has a sensible default, so this mostly catches explicit
    /// values that cannot work (a zero concurrency bound, an unparsable URL).
    pub fn validate(&self) -> Result<()> {
        self.optimizer.validate()?;
        self.transport.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    ///
    /// Sets up the tracing subscriber for logging based on the LoggingConfig.
    ///
    /// NOTE: This should be called early during startup to ensure logging is configured
    ///       before any log messages are emitted.
    ///
    pub fn setup_tracing(&self) {
        use tracing_subscriber::{EnvFilter, prelude::*};
        let env_filter = EnvFilter::from_default_env();
        match self.logging.format {
            LogFormat::Json => {
                let _ = tracing_subscriber::registry()
                    .with(tracing_subscriber::fmt::layer().json())
                    .with(env_filter)
                    .try_init();
            }
            LogFormat::Default => {
                let _ = tracing_subscriber::registry()
                    .with(tracing_subscriber::fmt::layer())
                    .with(env_filter)
                    .try_init();
            }
            LogFormat::Compact => {
                let _ = tracing_subscriber::registry()
                    .with(tracing_subscriber::fmt::layer().compact())
                    .with(env_filter)
                    .try_init();
            }
            LogFormat::Pretty => {
                let _ = tracing_subscriber::registry()
                    .with(tracing_subscriber::fmt::layer().pretty())
                    .with(env_filter)
                    .try_init();
            }
        }
    }
}

///
/// Parses a configuration string with references to environment variables
/// into a Config struct by substituting the environment variables and then
/// parsing the resulting TOML.
///
impl FromStr for Config {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let config_file = replace_handlebars_with_env(s);
        let config = toml::from_str::<Config>(&config_file)?;
        Ok(config)
    }
}
