//! Error types for policy loading and validation.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Errors raised while loading or validating a health policy document.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed policy document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("policy is missing the `{0}` section")]
    MissingSection(&'static str),

    #[error("unknown detection type `{0}`")]
    UnknownDetectionType(String),

    #[error("unknown recovery action `{0}`")]
    UnknownAction(String),

    #[error("detection interval must be positive, got {0}")]
    InvalidInterval(i64),

    #[error("node_update_timeout must be positive, got {0}")]
    InvalidNodeUpdateTimeout(i64),

    #[error("recovery.actions must list at least one action")]
    EmptyActions,
}
