//! Authenticated, retrying request execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde_json::Value;
use tracing::{debug, warn};

use super::retry::RetryPolicy;
use super::traits::{Transport, TransportFailure};
use crate::command::{Command, CommandKey};
use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use crate::oauth::{AuthToken, CredentialCoordinator};
use crate::wire;

/// JSON-RPC error codes that carry transport meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCodes {
    pub auth_expired: Vec<i64>,
    pub rate_limited: Vec<i64>,
}

impl Default for ErrorCodes {
    fn default() -> Self {
        Self {
            auth_expired: vec![-32001],
            rate_limited: vec![-32029],
        }
    }
}

impl ErrorCodes {
    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self {
            auth_expired: config.auth_expired_codes.clone(),
            rate_limited: config.rate_limited_codes.clone(),
        }
    }

    /// Escalate a 2xx body that reports auth expiry or rate limiting for the
    /// request as a whole.
    ///
    /// A batch escalates only when every entry carries one of these codes. If
    /// any entry succeeded, the body is returned as is and the offending
    /// entries surface as per-command failures.
    fn classify(&self, body: &Value) -> Option<TransportFailure> {
        let codes = wire::chunk_error_codes(body)?;
        let expired = |c: &i64| self.auth_expired.contains(c);
        let limited = |c: &i64| self.rate_limited.contains(c);
        if !codes.iter().all(|c| expired(c) || limited(c)) {
            return None;
        }
        if codes.iter().any(expired) {
            Some(TransportFailure::AuthExpired)
        } else {
            Some(TransportFailure::RateLimited { retry_after: None })
        }
    }
}

/// Sends wire requests with the current credential, renewing and retrying
/// per failure class.
///
/// Shared behind an `Arc` by every sequence of one client.
pub struct TransportClient {
    transport: Arc<dyn Transport>,
    coordinator: Arc<CredentialCoordinator>,
    policy: RetryPolicy,
    codes: ErrorCodes,
    attempts: AtomicU64,
    next_id: AtomicI64,
}

impl TransportClient {
    pub fn new(transport: Arc<dyn Transport>, coordinator: Arc<CredentialCoordinator>) -> Self {
        Self {
            transport,
            coordinator,
            policy: RetryPolicy::default(),
            codes: ErrorCodes::default(),
            attempts: AtomicU64::new(0),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_error_codes(mut self, codes: ErrorCodes) -> Self {
        self.codes = codes;
        self
    }

    pub fn coordinator(&self) -> &Arc<CredentialCoordinator> {
        &self.coordinator
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Total wire attempts made, retries included.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Send `request` and return the response body.
    ///
    /// An expired credential is renewed once and the request resent once; a
    /// second expiry is fatal. Transient failures and rate limiting are retried
    /// within the [`RetryPolicy`]. Protocol failures are never retried.
    pub async fn execute(&self, request: &Value) -> Result<Value> {
        let mut snapshot = self.coordinator.valid_snapshot().await?;
        let mut renewed = false;
        let mut transient_attempts: u32 = 0;
        let mut rate_limited_attempts: u32 = 0;

        loop {
            let failure = match self.attempt(request, &snapshot.token).await {
                Ok(body) => return Ok(body),
                Err(failure) => failure,
            };

            match failure {
                TransportFailure::AuthExpired => {
                    if renewed {
                        warn!(epoch = snapshot.epoch, "Renewed credential rejected");
                        return Err(Error::Auth(
                            "service rejected the credential again after renewal".into(),
                        ));
                    }
                    renewed = true;
                    warn!(epoch = snapshot.epoch, "Credential expired, renewing");
                    self.coordinator.renew_after(snapshot.epoch).await?;
                    snapshot = self.coordinator.snapshot().await?;
                }
                TransportFailure::Transient(message) => {
                    transient_attempts += 1;
                    if transient_attempts >= self.policy.max_attempts {
                        warn!(
                            attempts = transient_attempts,
                            error = %message,
                            "Max attempts exceeded"
                        );
                        return Err(Error::Transport {
                            attempts: transient_attempts,
                            message,
                        });
                    }
                    let backoff = self.policy.calculate_backoff(transient_attempts - 1);
                    warn!(
                        attempt = transient_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %message,
                        "Request failed, retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
                TransportFailure::RateLimited { retry_after } => {
                    rate_limited_attempts += 1;
                    if rate_limited_attempts >= self.policy.rate_limit_attempts {
                        warn!(attempts = rate_limited_attempts, "Still rate limited, giving up");
                        return Err(Error::RateLimited {
                            attempts: rate_limited_attempts,
                            retry_after,
                        });
                    }
                    let delay = self.policy.rate_limit_delay(retry_after);
                    warn!(
                        attempt = rate_limited_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, waiting"
                    );
                    tokio::time::sleep(delay).await;
                }
                TransportFailure::Protocol(message) => return Err(Error::Protocol(message)),
            }
        }
    }

    /// Issue one non-batched call and return its `result`.
    ///
    /// A JSON-RPC error answer becomes [`Error::Remote`].
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = CommandKey::Int(self.next_id.fetch_add(1, Ordering::Relaxed));
        let command = Command::new(id, method, params)?;
        let request = wire::encode_call(command.key(), command.method(), command.params());
        let body = self.execute(&request).await?;
        wire::decode_single(body, command.key())
    }

    async fn attempt(&self, request: &Value, token: &AuthToken) -> std::result::Result<Value, TransportFailure> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(attempt = n, "Wire attempt");
        let body = self.transport.send(request, &token.authorization()).await?;
        match self.codes.classify(&body) {
            Some(failure) => Err(failure),
            None => Ok(body),
        }
    }
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("policy", &self.policy)
            .field("codes", &self.codes)
            .field("attempts", &self.attempts())
            .finish()
    }
}
