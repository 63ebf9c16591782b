//! Refresh-token exchange against an OAuth 2.0 token endpoint.

use async_trait::async_trait;
use tracing::{debug, info};

use super::token::{AuthToken, RenewedAuthToken};

/// Why a refresh exchange did not produce a new token.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RefreshError {
    /// The endpoint refused the refresh token itself. Retrying cannot help.
    #[error("refresh token rejected: {0}")]
    Rejected(String),

    /// The exchange could not be completed (network, 5xx, unreadable body).
    #[error("refresh exchange failed: {0}")]
    Failed(String),
}

/// Performs one refresh exchange.
///
/// Implementations must not be called concurrently for the same credential;
/// [`CredentialCoordinator`](super::CredentialCoordinator) guarantees that.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, current: &AuthToken) -> Result<RenewedAuthToken, RefreshError>;
}

/// `grant_type=refresh_token` exchange posted as a form.
#[derive(Debug, Clone)]
pub struct OAuthRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl OAuthRefresher {
    pub fn new(client: reqwest::Client, token_url: impl Into<String>) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: None,
            client_secret: None,
        }
    }

    pub fn with_client_credentials(
        mut self,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        self.client_id = client_id;
        self.client_secret = client_secret;
        self
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, current: &AuthToken) -> Result<RenewedAuthToken, RefreshError> {
        if current.refresh_token.is_empty() {
            return Err(RefreshError::Rejected("no refresh token held".into()));
        }

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", current.refresh_token.as_str()),
        ];
        if let Some(id) = &self.client_id {
            form.push(("client_id", id.as_str()));
        }
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        info!(url = %self.token_url, "Exchanging refresh token");

        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| RefreshError::Failed(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = oauth_error_code(&body).unwrap_or_else(|| body.clone());
            return match status.as_u16() {
                400 | 401 | 403 => Err(RefreshError::Rejected(format!(
                    "token endpoint returned {}: {}",
                    status.as_u16(),
                    reason
                ))),
                _ => Err(RefreshError::Failed(format!(
                    "token endpoint returned {}: {}",
                    status.as_u16(),
                    reason
                ))),
            };
        }

        let data: RenewedAuthToken = response.json().await.map_err(|e| {
            RefreshError::Failed(format!("failed to parse refresh response: {}", e))
        })?;

        if data.access_token.is_empty() {
            return Err(RefreshError::Failed(
                "refresh response does not contain access_token".into(),
            ));
        }

        debug!(expires_in = ?data.expires_in, "Refresh exchange succeeded");
        Ok(data)
    }
}

/// Pull the RFC 6749 `error` field (e.g. `invalid_grant`) out of an error body.
fn oauth_error_code(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("error")?.as_str().map(str::to_string)
}
