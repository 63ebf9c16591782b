//! Token storage backends for persisting renewed credentials.
//!
//! Provides the [`TokenStorage`] trait and two implementations:
//! - [`FileTokenStorage`] - One JSON file per credential profile
//! - [`MemoryTokenStorage`] - In-memory storage for tests and ephemeral sessions
//!
//! Refresh tokens are usually single-use, so a renewed pair has to be written
//! back before the process exits or the next start strands on a dead token.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::instrument;

use super::token::AuthToken;
use crate::error::{Error, Result};

// =============================================================================
// TokenStorage trait
// =============================================================================

/// Trait for token storage backends.
///
/// Operations take a `profile` name so one backend can hold credentials for
/// several endpoints.
pub trait TokenStorage: Send + Sync {
    /// Load the stored token for a profile, if any.
    fn load(&self, profile: &str) -> Result<Option<AuthToken>>;

    /// Save a token for a profile.
    fn save(&self, profile: &str, token: &AuthToken) -> Result<()>;

    /// Remove the stored token for a profile.
    fn remove(&self, profile: &str) -> Result<()>;

    /// Check if a token exists in storage for a profile.
    fn exists(&self, profile: &str) -> Result<bool> {
        Ok(self.load(profile)?.is_some())
    }

    /// Get the name of this storage backend.
    fn name(&self) -> &str;
}

impl<T: TokenStorage + ?Sized> TokenStorage for Arc<T> {
    fn load(&self, profile: &str) -> Result<Option<AuthToken>> {
        (**self).load(profile)
    }
    fn save(&self, profile: &str, token: &AuthToken) -> Result<()> {
        (**self).save(profile, token)
    }
    fn remove(&self, profile: &str) -> Result<()> {
        (**self).remove(profile)
    }
    fn exists(&self, profile: &str) -> Result<bool> {
        (**self).exists(profile)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

// =============================================================================
// FileTokenStorage
// =============================================================================

/// File permissions for token files (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Directory permissions (Unix only): owner read/write/execute.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// File-based token storage at `{dir}/{profile}.json`.
///
/// Files are written to a temp path and renamed into place, with 0600
/// permissions on Unix.
#[derive(Debug, Clone)]
pub struct FileTokenStorage {
    dir: PathBuf,
}

impl FileTokenStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn profile_path(&self, profile: &str) -> PathBuf {
        self.dir.join(format!("{}.json", profile))
    }

    fn ensure_dir(&self) -> Result<()> {
        if self.dir.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Storage(format!(
                "Failed to create token directory '{}': {}",
                self.dir.display(),
                e
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(DIR_MODE);
            std::fs::set_permissions(&self.dir, perms).map_err(|e| {
                Error::Storage(format!(
                    "Failed to set directory permissions on '{}': {}",
                    self.dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    fn write_temp(&self, temp_path: &Path, content: &str) -> Result<()> {
        let io_err = |e: std::io::Error| {
            Error::Storage(format!(
                "Failed to write temp file '{}': {}",
                temp_path.display(),
                e
            ))
        };

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(temp_path)
                .map_err(io_err)?;
            file.write_all(content.as_bytes()).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }

        #[cfg(not(unix))]
        std::fs::write(temp_path, content).map_err(io_err)?;

        Ok(())
    }
}

impl TokenStorage for FileTokenStorage {
    #[instrument(skip(self))]
    fn load(&self, profile: &str) -> Result<Option<AuthToken>> {
        let path = self.profile_path(profile);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to read token file '{}': {}",
                    path.display(),
                    e
                )));
            }
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let token: AuthToken = serde_json::from_str(&content).map_err(|e| {
            Error::Storage(format!(
                "Failed to parse token file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Ok(Some(token))
    }

    #[instrument(skip(self, token))]
    fn save(&self, profile: &str, token: &AuthToken) -> Result<()> {
        self.ensure_dir()?;

        let path = self.profile_path(profile);
        let content = serde_json::to_string_pretty(token)
            .map_err(|e| Error::Storage(format!("Failed to serialize token: {}", e)))?;

        let temp_path = path.with_extension("tmp");
        self.write_temp(&temp_path, &content)?;

        if let Err(e) = std::fs::rename(&temp_path, &path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(Error::Storage(format!(
                "Failed to rename '{}' to '{}': {}",
                temp_path.display(),
                path.display(),
                e
            )));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    fn remove(&self, profile: &str) -> Result<()> {
        let path = self.profile_path(profile);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to remove token file '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    fn exists(&self, profile: &str) -> Result<bool> {
        Ok(self.profile_path(profile).exists())
    }

    fn name(&self) -> &str {
        "file"
    }
}

// =============================================================================
// MemoryTokenStorage
// =============================================================================

/// In-memory token storage. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStorage {
    inner: Arc<RwLock<HashMap<String, AuthToken>>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a MemoryTokenStorage with an initial token for a profile.
    pub fn with_token(profile: impl Into<String>, token: AuthToken) -> Self {
        let mut map = HashMap::new();
        map.insert(profile.into(), token);
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Storage("token map lock poisoned".into())
}

impl TokenStorage for MemoryTokenStorage {
    #[instrument(skip(self))]
    fn load(&self, profile: &str) -> Result<Option<AuthToken>> {
        let guard = self.inner.read().map_err(poisoned)?;
        Ok(guard.get(profile).cloned())
    }

    #[instrument(skip(self, token))]
    fn save(&self, profile: &str, token: &AuthToken) -> Result<()> {
        let mut guard = self.inner.write().map_err(poisoned)?;
        guard.insert(profile.to_string(), token.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    fn remove(&self, profile: &str) -> Result<()> {
        let mut guard = self.inner.write().map_err(poisoned)?;
        guard.remove(profile);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
