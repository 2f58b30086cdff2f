//! reqwest-backed transport.

use super::{ApiRequest, RequestBody, Transport};
use crate::{Error, Result, Sensitive, TransportConfig};
use http::{
    HeaderMap,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use url::Url;

/// [`Transport`] that performs real HTTP calls with a pooled `reqwest::Client`.
///
/// Cloning is cheap; clones share the connection pool.
///
/// # Example
///
/// ```rust,no_run
/// use api_optimizer::{HttpTransport, TransportConfig};
/// use std::time::Duration;
///
/// # fn example() -> api_optimizer::Result<()> {
/// let config = TransportConfig::default()
///     .with_base_url("http://localhost:8000")
///     .with_request_timeout(Duration::from_secs(30));
/// let transport = HttpTransport::new(&config)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Option<Url>,
    bearer_token: Option<Sensitive<String>>,
}

impl HttpTransport {
    /// Builds the client from configuration: timeout, user agent, default
    /// headers, base URL and bearer token.
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in config.parsed_default_headers()? {
            headers.insert(name, value);
        }

        let user_agent = config.user_agent.clone().unwrap_or_else(|| {
            format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        });

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|err| Error::config(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: config.parsed_base_url()?,
            bearer_token: config.bearer_token.clone(),
        })
    }

    /// Wraps an existing client, for callers that need reqwest options the
    /// configuration does not expose.
    pub fn with_client(client: reqwest::Client, base_url: Option<Url>) -> Self {
        Self {
            client,
            base_url,
            bearer_token: None,
        }
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Resolves a request URL, joining relative paths onto the base URL.
    pub fn resolve_url(&self, url: &str) -> Result<Url> {
        match Url::parse(url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base_url {
                Some(base) => Ok(base.join(url)?),
                None => Err(Error::invalid_input(format!(
                    "Relative URL `{url}` requires transport.base_url"
                ))),
            },
            Err(err) => Err(err.into()),
        }
    }
}

impl Transport for HttpTransport {
    type Response = reqwest::Response;

    async fn execute(&self, request: &ApiRequest) -> Result<reqwest::Response> {
        let url = self.resolve_url(&request.url)?;

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());

        if let Some(token) = &self.bearer_token
            && !request.headers.contains_key(AUTHORIZATION)
        {
            builder = builder.bearer_auth(&token.0);
        }

        match &request.body {
            RequestBody::Empty => {}
            RequestBody::Text(text) => builder = builder.body(text.clone()),
            RequestBody::Json(value) => {
                if !request.headers.contains_key(CONTENT_TYPE) {
                    builder = builder.header(CONTENT_TYPE, "application/json");
                }
                builder = builder.body(value.to_string());
            }
        }

        Ok(builder.send().await?)
    }
}
