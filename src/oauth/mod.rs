//! Credential ownership and single-flight renewal.
//!
//! # Architecture
//!
//! - [`CredentialCoordinator`] - Owns the one current [`AuthToken`]; readers take
//!   immutable snapshots, writers go through a single-flight renewal section
//! - [`TokenRefresher`] - The refresh exchange ([`OAuthRefresher`] over HTTP)
//! - [`TokenStorage`] - Persistence for renewed tokens (file, memory)
//!
//! Refresh tokens are typically single-use: two concurrent exchanges can
//! invalidate each other and strand a caller. Every renewal therefore funnels
//! through one async mutex, and callers that queued behind an exchange adopt
//! its outcome instead of starting another.

pub mod coordinator;
pub mod refresh;
pub mod storage;
pub mod token;

pub use refresh::{OAuthRefresher, RefreshError, TokenRefresher};
pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenStorage};
pub use token::{AuthToken, RenewedAuthToken};
pub use coordinator::{CredentialCoordinator, DEFAULT_PROFILE, TokenSnapshot};
