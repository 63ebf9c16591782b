//! Networking traits.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// How a single wire attempt failed. Decides whether and how to retry.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFailure {
    /// The credential was refused (HTTP 401 or an auth-expired JSON-RPC code).
    AuthExpired,
    /// Connect failure, timeout, 408 or 5xx.
    Transient(String),
    /// Quota exceeded; `retry_after` is the server's hint, when it sent one.
    RateLimited { retry_after: Option<Duration> },
    /// Anything the service should never have sent. Not retried.
    Protocol(String),
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthExpired => write!(f, "credential expired"),
            Self::Transient(msg) => write!(f, "transient failure: {msg}"),
            Self::RateLimited { retry_after: Some(d) } => {
                write!(f, "rate limited, retry after {}ms", d.as_millis())
            }
            Self::RateLimited { retry_after: None } => write!(f, "rate limited"),
            Self::Protocol(msg) => write!(f, "protocol violation: {msg}"),
        }
    }
}

/// One raw attempt of a wire request.
///
/// Implementations send `body` once with the given `Authorization` header value
/// and return the decoded JSON body of a 2xx response. Retrying and credential
/// renewal happen above this trait, in
/// [`TransportClient`](crate::net::TransportClient).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, body: &Value, authorization: &str) -> Result<Value, TransportFailure>;
}
