//! Error types for ensemble-team.

use std::path::PathBuf;

use thiserror::Error;

use ensemble_core::{GitError, RegistryError, StoreError};

/// All errors that can arise from team coordination.
#[derive(Debug, Error)]
pub enum TeamError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("git error: {0}")]
    Git(#[from] GitError),

    /// Tera template engine error.
    #[error("prompt template error: {0}")]
    Render(#[from] tera::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown team template '{name}'; available: {available}")]
    TemplateNotFound { name: String, available: String },

    /// YAML parse error for a team template, with its path.
    #[error("failed to parse team template at {path}: {source}")]
    TemplateParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("team template '{0}' declares no teammates")]
    EmptyTemplate(String),

    #[error("No active team to stop")]
    NoActiveTeam,

    #[error("team '{template}' is already active (trace {trace_id}); stop it first")]
    TeamAlreadyActive { template: String, trace_id: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> TeamError {
    TeamError::Io {
        path: path.into(),
        source,
    }
}
