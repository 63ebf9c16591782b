//! Single-flight owner of the current credential.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::refresh::{RefreshError, TokenRefresher};
use super::storage::TokenStorage;
use super::token::AuthToken;
use crate::error::{Error, Result};

/// Default profile name used for storage.
pub const DEFAULT_PROFILE: &str = "default";

// =============================================================================
// TokenSnapshot
// =============================================================================

/// Immutable view of the credential at one point in time.
///
/// `epoch` identifies the renewal generation the token belongs to; handing it
/// back to [`CredentialCoordinator::renew_after`] lets a caller join a renewal
/// that already replaced its token instead of triggering another one.
#[derive(Debug, Clone)]
pub struct TokenSnapshot {
    pub token: Arc<AuthToken>,
    pub epoch: u64,
}

// =============================================================================
// CredentialCoordinator
// =============================================================================

#[derive(Debug)]
struct CredentialState {
    token: Arc<AuthToken>,
    /// Bumped by every finished exchange and every reconfiguration.
    epoch: u64,
    /// Outcome of the exchange that produced the current epoch.
    last_outcome: std::result::Result<(), String>,
    /// Set once the refresh token is rejected; cleared only by `reconfigure`.
    invalid: Option<String>,
}

/// Keeps exactly one credential current and serializes its renewal.
pub struct CredentialCoordinator {
    state: RwLock<CredentialState>,
    /// Held for the whole duration of an exchange.
    gate: Mutex<()>,
    refresher: Arc<dyn TokenRefresher>,
    storage: Option<Arc<dyn TokenStorage>>,
    profile: String,
    exchanges: AtomicU64,
}

impl CredentialCoordinator {
    /// Create a coordinator around an initial token.
    pub fn new(token: AuthToken, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            state: RwLock::new(CredentialState {
                token: Arc::new(token),
                epoch: 0,
                last_outcome: Ok(()),
                invalid: None,
            }),
            gate: Mutex::new(()),
            refresher,
            storage: None,
            profile: DEFAULT_PROFILE.to_string(),
            exchanges: AtomicU64::new(0),
        }
    }

    /// Load the initial token from storage.
    pub fn from_storage(
        storage: Arc<dyn TokenStorage>,
        profile: &str,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Result<Self> {
        let token = storage.load(profile)?.ok_or_else(|| {
            Error::Auth(format!(
                "no stored credential for profile '{}' in {} storage",
                profile,
                storage.name()
            ))
        })?;
        info!(profile, source = storage.name(), "Loaded credential from storage");
        Ok(Self::new(token, refresher)
            .with_storage(storage)
            .with_profile(profile))
    }

    /// Persist renewed tokens through `storage`.
    pub fn with_storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Number of refresh exchanges performed so far.
    pub fn renewal_count(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    /// Whether the refresh token has been rejected.
    pub async fn is_invalid(&self) -> bool {
        self.state.read().await.invalid.is_some()
    }

    /// Current token, without renewing.
    pub async fn snapshot(&self) -> Result<TokenSnapshot> {
        let state = self.state.read().await;
        if let Some(reason) = &state.invalid {
            return Err(Error::Auth(format!("credential is invalid: {}", reason)));
        }
        Ok(TokenSnapshot {
            token: Arc::clone(&state.token),
            epoch: state.epoch,
        })
    }

    /// Current token, renewing first if it is already past its expiry.
    pub async fn valid_snapshot(&self) -> Result<TokenSnapshot> {
        let snapshot = self.snapshot().await?;
        if !snapshot.token.is_expired() {
            return Ok(snapshot);
        }
        debug!(epoch = snapshot.epoch, "Token expired, renewing before use");
        self.renew_after(snapshot.epoch).await?;
        self.snapshot().await
    }

    /// Renew the credential, joining an exchange that is already in flight.
    pub async fn renew(&self) -> Result<()> {
        let epoch = self.state.read().await.epoch;
        self.renew_after(epoch).await
    }

    /// Renew a credential known to be stale at `seen_epoch`.
    ///
    /// If another caller finished an exchange after `seen_epoch`, its outcome is
    /// returned and no new exchange is started.
    pub async fn renew_after(&self, seen_epoch: u64) -> Result<()> {
        self.check_valid().await?;

        let _gate = self.gate.lock().await;

        let current = {
            let state = self.state.read().await;
            if let Some(reason) = &state.invalid {
                return Err(Error::Auth(format!("credential is invalid: {}", reason)));
            }
            if state.epoch > seen_epoch {
                debug!(
                    seen_epoch,
                    epoch = state.epoch,
                    "Joining completed renewal"
                );
                return state.last_outcome.clone().map_err(Error::Auth);
            }
            Arc::clone(&state.token)
        };

        self.exchanges.fetch_add(1, Ordering::SeqCst);
        let result = self.refresher.refresh(&current).await;

        let mut state = self.state.write().await;
        state.epoch += 1;
        match result {
            Ok(renewed) => {
                let updated = Arc::new(current.renewed(renewed));
                state.token = Arc::clone(&updated);
                state.last_outcome = Ok(());
                info!(epoch = state.epoch, profile = %self.profile, "Credential renewed");
                drop(state);
                // Still under the gate, so saves land in renewal order.
                self.persist(&updated).await;
                Ok(())
            }
            Err(RefreshError::Rejected(reason)) => {
                warn!(profile = %self.profile, %reason, "Refresh token rejected, credential is now invalid");
                state.invalid = Some(reason.clone());
                state.last_outcome = Err(reason.clone());
                Err(Error::Auth(reason))
            }
            Err(RefreshError::Failed(reason)) => {
                warn!(profile = %self.profile, %reason, "Credential renewal failed");
                state.last_outcome = Err(reason.clone());
                Err(Error::Auth(reason))
            }
        }
    }

    /// Replace the credential from outside, clearing any invalid mark.
    pub async fn reconfigure(&self, token: AuthToken) {
        let _gate = self.gate.lock().await;
        let token = Arc::new(token);
        {
            let mut state = self.state.write().await;
            state.token = Arc::clone(&token);
            state.epoch += 1;
            state.last_outcome = Ok(());
            state.invalid = None;
            info!(epoch = state.epoch, profile = %self.profile, "Credential reconfigured");
        }
        self.persist(&token).await;
    }

    async fn check_valid(&self) -> Result<()> {
        match &self.state.read().await.invalid {
            Some(reason) => Err(Error::Auth(format!("credential is invalid: {}", reason))),
            None => Ok(()),
        }
    }

    /// Save `token` on the blocking pool; file storage syncs to disk.
    async fn persist(&self, token: &Arc<AuthToken>) {
        let Some(storage) = self.storage.clone() else {
            return;
        };
        let profile = self.profile.clone();
        let token = Arc::clone(token);
        let saved = tokio::task::spawn_blocking(move || storage.save(&profile, &token)).await;
        match saved {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(profile = %self.profile, "Failed to persist token: {}", e),
            Err(e) => warn!(profile = %self.profile, "Token persistence task failed: {}", e),
        }
    }
}

impl std::fmt::Debug for CredentialCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCoordinator")
            .field("profile", &self.profile)
            .field("has_storage", &self.storage.is_some())
            .field("exchanges", &self.renewal_count())
            .finish()
    }
}
