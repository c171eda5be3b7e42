use std::time::Duration;

use async_trait::async_trait;
use cadenza_common::transport::{Headers, HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use cadenza_domain::constants::{DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use cadenza_domain::{ApiError, ClientConfig, TransportError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client as ReqwestClient, Method};
use tracing::debug;

use crate::errors::{transport_error, InfraError};

/// HTTP transport over a shared reqwest connection pool.
///
/// Sends each request exactly once: status codes are returned as data and
/// retry decisions belong to the request executor.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    /// Start building a new transport.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self, ApiError> {
        Self::builder().build()
    }

    /// Transport honouring the timeout and user agent of `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        let mut builder = Self::builder().timeout(config.request_timeout());
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        builder.build()
    }

    fn to_reqwest(&self, request: HttpRequest) -> Result<reqwest::Request, TransportError> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        builder.build().map_err(|err| transport_error(&err))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = request.method;
        let url = request.url.clone();
        let request = self.to_reqwest(request)?;

        debug!(%method, %url, "sending HTTP request");
        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                debug!(%method, %url, error = %err, "HTTP request failed");
                return Err(transport_error(&err));
            }
        };

        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value)))
            .collect();
        let body = response.bytes().await.map_err(|err| transport_error(&err))?;
        debug!(%method, %url, status, bytes = body.len(), "received HTTP response");

        Ok(HttpResponse { status, headers, body })
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug)]
pub struct ReqwestTransportBuilder {
    timeout: Duration,
    user_agent: Option<String>,
    default_headers: HeaderMap,
    system_proxy: bool,
    accept_invalid_certs: bool,
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: None,
            default_headers: HeaderMap::new(),
            system_proxy: true,
            accept_invalid_certs: false,
        }
    }
}

impl ReqwestTransportBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Header sent with every request unless the request sets it itself.
    pub fn default_header(mut self, name: &str, value: &str) -> Result<Self, ApiError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| ApiError::Config(format!("invalid header name '{name}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| ApiError::Config(format!("invalid value for header '{name}': {err}")))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Route through the proxy named by `HTTP_PROXY`/`HTTPS_PROXY` (the
    /// default). Disable to always connect directly.
    pub fn use_system_proxy(mut self, enabled: bool) -> Self {
        self.system_proxy = enabled;
        self
    }

    /// Test-only helper to allow insecure TLS (e.g., self-signed certs).
    #[cfg(test)]
    pub fn accept_invalid_certs(mut self, enabled: bool) -> Self {
        self.accept_invalid_certs = enabled;
        self
    }

    pub fn build(self) -> Result<ReqwestTransport, ApiError> {
        let agent = self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let mut builder = ReqwestClient::builder()
            .timeout(self.timeout)
            .user_agent(agent)
            .default_headers(self.default_headers);

        if !self.system_proxy {
            builder = builder.no_proxy();
        }
        if self.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|err| ApiError::from(InfraError::from(err)))?;
        Ok(ReqwestTransport { client })
    }
}
