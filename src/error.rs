//! Error types for the batching client.

use std::time::Duration;

use serde_json::Value;

use crate::command::CommandKey;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that terminate an operation or a [`ResultSequence`](crate::sequence::ResultSequence).
///
/// Failures of a single command inside an otherwise successful chunk are not
/// represented here; they travel as [`PerCommandError`] data.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller misuse, reported synchronously and never retried.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// The credential could not be renewed, or the service rejected it again
    /// right after a renewal.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Connection reset, timeout or 5xx that outlived the retry budget.
    #[error("Transport failed after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },

    /// The service kept reporting its quota as exceeded.
    #[error("Rate limited after {attempts} attempt(s)")]
    RateLimited {
        attempts: u32,
        retry_after: Option<Duration>,
    },

    /// Malformed or unexpected response shape. Never retried.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A non-batched call answered with a JSON-RPC error object.
    #[error("Remote error ({code}): {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a later, independent attempt of the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::RateLimited { .. })
    }

    /// Whether the error comes from the credential layer.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

// ---------------------------------------------------------------------------
// PerCommandError
// ---------------------------------------------------------------------------

/// Why one command inside a chunk produced no value.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandErrorKind {
    /// The remote method itself failed.
    Application {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    /// The chunk succeeded but the response carried no entry for this key.
    MissingResult,
}

/// A failure attributed to one specific command. Does not stop iteration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("command {key} failed: {kind}")]
pub struct PerCommandError {
    pub key: CommandKey,
    pub kind: CommandErrorKind,
}

impl PerCommandError {
    pub fn application(key: CommandKey, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            key,
            kind: CommandErrorKind::Application {
                code,
                message: message.into(),
                data,
            },
        }
    }

    pub fn missing(key: CommandKey) -> Self {
        Self {
            key,
            kind: CommandErrorKind::MissingResult,
        }
    }

    /// The remote error code, if the service reported one.
    pub fn code(&self) -> Option<i64> {
        match &self.kind {
            CommandErrorKind::Application { code, .. } => Some(*code),
            CommandErrorKind::MissingResult => None,
        }
    }

    /// True when the key was absent from an otherwise successful response.
    pub fn is_protocol(&self) -> bool {
        matches!(self.kind, CommandErrorKind::MissingResult)
    }
}

impl std::fmt::Display for CommandErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Application { code, message, .. } => write!(f, "remote error ({code}): {message}"),
            Self::MissingResult => write!(f, "no result for this key in the chunk response"),
        }
    }
}
