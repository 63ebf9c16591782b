//! Access/refresh token pair and its expiry bookkeeping.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Safety margin for token expiry checks (60 seconds).
const EXPIRY_SAFETY_MARGIN_SECS: i64 = 60;

/// OAuth-style credential held by the
/// [`CredentialCoordinator`](super::CredentialCoordinator).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthToken {
    /// Bearer token attached to every wire request.
    pub access_token: String,

    /// Single-use token exchanged for a new pair on renewal.
    pub refresh_token: String,

    /// Unix timestamp when the access token expires, if known.
    pub expires_at: Option<i64>,

    /// Token type, typically "Bearer".
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl AuthToken {
    /// Create a token that expires `expires_in` seconds from now.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: Option<i64>,
    ) -> Self {
        let expires_at = expires_in.map(|ei| chrono::Utc::now().timestamp() + ei);
        Self::with_expires_at(access_token, refresh_token, expires_at)
    }

    /// Create a token with a specific expiration timestamp.
    pub fn with_expires_at(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: Option<i64>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
            token_type: default_token_type(),
        }
    }

    /// Check if the access token is expired or about to expire.
    ///
    /// Returns `false` if no expiry is set; the service then tells us through
    /// an auth failure.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => {
                let now = chrono::Utc::now().timestamp();
                exp <= now + EXPIRY_SAFETY_MARGIN_SECS
            }
            None => false,
        }
    }

    /// Get the duration until the access token expires.
    ///
    /// Returns `Duration::ZERO` if the token has already expired or has no expiry set.
    pub fn time_until_expiry(&self) -> Duration {
        match self.expires_at {
            Some(exp) => {
                let remaining = exp - chrono::Utc::now().timestamp();
                if remaining > 0 {
                    Duration::from_secs(remaining as u64)
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// Apply a refresh exchange result.
    ///
    /// Services that do not rotate refresh tokens omit the new one; the
    /// previous refresh token then stays valid.
    pub fn renewed(&self, renewed: RenewedAuthToken) -> Self {
        let refresh_token = renewed
            .refresh_token
            .filter(|rt| !rt.is_empty())
            .unwrap_or_else(|| self.refresh_token.clone());
        Self {
            access_token: renewed.access_token,
            refresh_token,
            expires_at: renewed
                .expires_in
                .map(|ei| chrono::Utc::now().timestamp() + ei),
            token_type: renewed
                .token_type
                .unwrap_or_else(|| self.token_type.clone()),
        }
    }
}

/// Response of a refresh exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenewedAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}
