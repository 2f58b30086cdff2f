use {
    crate::{Error, Result, Sensitive},
    http::{HeaderName, HeaderValue},
    serde::Deserialize,
    std::{collections::HashMap, time::Duration},
    url::Url,
};

///
/// Configuration for the reqwest-backed HTTP transport.
///
/// The transport owns every network-level concern the optimizer leaves out,
/// most importantly the request timeout.
///
/// # Example TOML
///
/// ```toml
/// [transport]
/// base_url = "http://localhost:8000"
/// request_timeout = "30s"
/// user_agent = "drone-dashboard"
/// bearer_token = "{{ DASHSCOPE_API_KEY }}"
///
/// [transport.default_headers]
/// x-client = "dashboard"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TransportConfig {
    /// Base URL that relative request URLs are resolved against.
    /// By default `base_url` is None and every request URL must be absolute.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Total time allowed for a single call, from connect until the
    /// response headers arrive and the body is read.
    /// By default `request_timeout` is None (no timeout).
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Value of the `user-agent` header. Defaults to the crate name and version.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Token sent as `authorization: Bearer <token>` on every request.
    #[serde(default)]
    pub bearer_token: Option<Sensitive<String>>,

    /// Headers added to every request unless the request sets them itself.
    #[serde(default)]
    pub default_headers: HashMap<String, String>,
}

impl TransportConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Parses `base_url`, if any.
    pub fn parsed_base_url(&self) -> Result<Option<Url>> {
        self.base_url
            .as_deref()
            .map(|url| {
                let parsed = Url::parse(url)?;
                if parsed.cannot_be_a_base() {
                    return Err(Error::config(format!(
                        "transport.base_url `{url}` cannot be used as a base URL"
                    )));
                }
                Ok(parsed)
            })
            .transpose()
    }

    /// Parses `default_headers` into typed header names and values.
    pub fn parsed_default_headers(&self) -> Result<Vec<(HeaderName, HeaderValue)>> {
        self.default_headers
            .iter()
            .map(|(name, value)| {
                Ok((
                    HeaderName::from_bytes(name.as_bytes())?,
                    HeaderValue::from_str(value)?,
                ))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        self.parsed_base_url()?;
        self.parsed_default_headers()?;
        if let Some(token) = &self.bearer_token
            && token.0.trim().is_empty()
        {
            return Err(Error::config("transport.bearer_token must not be empty"));
        }
        Ok(())
    }
}
