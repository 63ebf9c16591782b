//! reqwest-backed [`Transport`]: one POST per attempt.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, RETRY_AFTER};
use serde_json::Value;
use tracing::{debug, warn};

use super::traits::{Transport, TransportFailure};

/// Header carrying a per-attempt correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Posts JSON-RPC bodies to one endpoint URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, body: &Value, authorization: &str) -> Result<Value, TransportFailure> {
        let request_id = uuid::Uuid::new_v4().to_string();
        debug!(request_id = %request_id, url = %self.url, "Sending wire request");

        let response = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, authorization)
            .header(REQUEST_ID_HEADER, &request_id)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_send_error(&e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body_text = response.text().await.unwrap_or_default();
            warn!(request_id = %request_id, status, "Wire request failed");
            return Err(classify_status(status, retry_after, &body_text));
        }

        let text = response
            .text()
            .await
            .map_err(|e| TransportFailure::Transient(format!("failed to read response body: {e}")))?;

        serde_json::from_str(&text).map_err(|e| {
            TransportFailure::Protocol(format!("response body is not valid JSON: {e}"))
        })
    }
}

/// Map a non-2xx status onto a failure class.
pub fn classify_status(status: u16, retry_after: Option<Duration>, body: &str) -> TransportFailure {
    match status {
        401 => TransportFailure::AuthExpired,
        429 => TransportFailure::RateLimited { retry_after },
        408 | 500..=599 => TransportFailure::Transient(format!("HTTP {status}: {}", truncate(body))),
        _ => TransportFailure::Protocol(format!("unexpected HTTP {status}: {}", truncate(body))),
    }
}

fn classify_send_error(e: &reqwest::Error) -> TransportFailure {
    if e.is_timeout() {
        TransportFailure::Transient(format!("request timed out: {e}"))
    } else if e.is_builder() {
        TransportFailure::Protocol(format!("request could not be built: {e}"))
    } else {
        TransportFailure::Transient(format!("request failed: {e}"))
    }
}

/// `Retry-After` as delta-seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

fn truncate(body: &str) -> &str {
    const LIMIT: usize = 256;
    if body.len() <= LIMIT {
        return body;
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
