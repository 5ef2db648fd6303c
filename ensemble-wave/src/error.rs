use std::path::PathBuf;

use thiserror::Error;

use ensemble_core::StoreError;

/// Error surface for wave planning, launching and collection.
#[derive(Debug, Error)]
pub enum WaveError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("a wave needs at least one analyzer")]
    NoAnalyzers,

    #[error("invalid analyzer name '{0}': must contain at least one of [A-Za-z0-9_-]")]
    InvalidAnalyzer(String),

    #[error("analyzers '{first}' and '{second}' map to the same key '{key}'")]
    DuplicateAnalyzer {
        first: String,
        second: String,
        key: String,
    },

    #[error("no wave plan at {0}")]
    PlanNotFound(PathBuf),

    #[error("worker command is empty")]
    EmptyWorkerCommand,

    #[error("failed to launch worker for '{analyzer}': {source}")]
    Launch {
        analyzer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("wave driver task failed: {0}")]
    Join(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WaveError {
    WaveError::Io {
        path: path.into(),
        source,
    }
}
