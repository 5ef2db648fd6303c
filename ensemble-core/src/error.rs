//! Error types for ensemble-core.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{SessionId, ThreadType};

/// Errors raised by the lock-guarded JSON document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON parse error on load, with the document path.
    #[error("failed to parse document at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error (write path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another process held the document lock for longer than the timeout.
    #[error("document busy: lock {path} not acquired within {waited:?}, retry")]
    Busy { path: PathBuf, waited: Duration },
}

/// Failure of a `git` subprocess.
#[derive(Debug, Error)]
pub enum GitError {
    /// `git` could not be spawned at all.
    #[error("failed to run git in {dir}: {source}")]
    Spawn {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `git` ran and exited non-zero.
    #[error("git {args} failed: {stderr}")]
    Failed { args: String, stderr: String },
}

/// All errors that can arise from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("git error: {0}")]
    Git(#[from] GitError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error for `config.yaml`, with the file path.
    #[error("failed to parse config at {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("cannot delete main session {0}")]
    CannotDeleteMain(SessionId),

    #[error("invalid thread transition for session {id}: {from} -> {to}")]
    InvalidTransition {
        id: SessionId,
        from: ThreadType,
        to: ThreadType,
    },

    #[error("unknown thread type '{0}'; expected one of: base, parallel, chained, fusion, big, long, zero")]
    UnknownThreadType(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn registry_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.into(),
        source,
    }
}
