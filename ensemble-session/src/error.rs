//! Error types for ensemble-session.

use std::path::PathBuf;

use thiserror::Error;

use ensemble_core::{GitError, RegistryError, StoreError};

/// All errors that can arise from session lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("git error: {0}")]
    Git(#[from] GitError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Branch name rejected before anything was touched.
    #[error("invalid branch name '{branch}': {reason}")]
    InvalidBranch { branch: String, reason: String },

    /// Nickname rejected before anything was touched.
    #[error("invalid nickname '{nickname}': {reason}")]
    InvalidNickname { nickname: String, reason: String },

    #[error("worktree path already exists: {0}")]
    WorktreeExists(PathBuf),

    /// Epic file could not be parsed.
    #[error("failed to parse epic at {path}: {source}")]
    Epic {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("nothing to spawn: {0}")]
    EmptySpawn(String),

    #[error("cannot spawn {requested} sessions at once (limit {limit})")]
    SpawnTooLarge { requested: usize, limit: usize },

    #[error("multiplexer command failed: {0}")]
    Multiplexer(String),
}

/// Convenience constructor for [`SessionError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SessionError {
    SessionError::Io {
        path: path.into(),
        source,
    }
}
