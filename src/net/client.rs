//! Shared reqwest client.

use std::time::Duration;
use reqwest::{Client, ClientBuilder};

use crate::config::EndpointConfig;

/// Default user agent for the library.
pub const USER_AGENT: &str = concat!("batchrpc/", env!("CARGO_PKG_VERSION"));

/// Default connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout. Every wire request is bounded by it.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Generic HTTP client wrapper.
///
/// Provides a standard configuration (User-Agent, timeouts) for the service
/// endpoint and the token endpoint alike.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    /// Create a new HTTP client with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new builder.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Build a client from the `[endpoint]` section.
    pub fn from_config(endpoint: &EndpointConfig) -> Self {
        let mut builder = Self::builder()
            .connect_timeout(Duration::from_secs(endpoint.connect_timeout_secs))
            .request_timeout(Duration::from_secs(endpoint.request_timeout_secs));
        if let Some(ua) = &endpoint.user_agent {
            builder = builder.user_agent(ua);
        }
        builder.build()
    }

    /// Get the inner reqwest client.
    pub fn inner(&self) -> &Client {
        &self.inner
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    builder: ClientBuilder,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            builder: Client::builder()
                .user_agent(USER_AGENT)
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT),
        }
    }
}

impl HttpClientBuilder {
    /// Set a custom user agent.
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.builder = self.builder.user_agent(ua);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.connect_timeout(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.timeout(timeout);
        self
    }

    /// Build the client.
    pub fn build(self) -> HttpClient {
        let inner = match self.builder.build() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to build HTTP client with custom config: {}; using defaults", e);
                Client::default()
            }
        };
        HttpClient { inner }
    }
}
