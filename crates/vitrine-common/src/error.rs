//! Common error types used throughout vitrine.
//!
//! Mount, scan and playback failures are recoverable; the registry and the
//! channel workers record them and keep going. Only
//! [`Error::MediaRootUnavailable`] is meant to reach the surrounding service.

use std::path::PathBuf;

/// Common error type for vitrine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or missing fields in a source or playback update.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A network share could not be mounted or unmounted.
    #[error("Mount failed for source '{source_name}': {message}")]
    Mount {
        source_name: String,
        message: String,
    },

    /// Listing a source's file tree failed.
    #[error("Scan failed for source '{source_name}': {message}")]
    Scan {
        source_name: String,
        message: String,
    },

    /// A playback backend crashed or exited unexpectedly.
    #[error("Playback error on {channel} channel: {message}")]
    Playback { channel: String, message: String },

    /// The local media root is missing or not writable.
    #[error("Media root unavailable at {path:?}: {reason}")]
    MediaRootUnavailable { path: PathBuf, reason: String },

    /// Encrypting or decrypting a stored credential failed.
    #[error("Secret store error: {0}")]
    Secret(String),

    /// An external tool failed to spawn, timed out or exited non-zero.
    #[error("Tool error ({tool}): {message}")]
    Tool { tool: String, message: String },

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new Config error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new Mount error.
    pub fn mount<N: Into<String>, S: Into<String>>(source_name: N, msg: S) -> Self {
        Self::Mount {
            source_name: source_name.into(),
            message: msg.into(),
        }
    }

    /// Create a new Scan error.
    pub fn scan<N: Into<String>, S: Into<String>>(source_name: N, msg: S) -> Self {
        Self::Scan {
            source_name: source_name.into(),
            message: msg.into(),
        }
    }

    /// Create a new Playback error.
    pub fn playback<C: ToString, S: Into<String>>(channel: C, msg: S) -> Self {
        Self::Playback {
            channel: channel.to_string(),
            message: msg.into(),
        }
    }

    /// Create a new Secret error.
    pub fn secret<S: Into<String>>(msg: S) -> Self {
        Self::Secret(msg.into())
    }

    /// Create a new Tool error.
    pub fn tool<T: Into<String>, S: Into<String>>(tool: T, msg: S) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: msg.into(),
        }
    }

    /// Whether this error should stop the surrounding service.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MediaRootUnavailable { .. })
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
