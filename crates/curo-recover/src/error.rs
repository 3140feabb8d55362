//! Error types for recovery orchestration.

use thiserror::Error;

use curo_state::StateError;

/// Result type alias for orchestrator operations.
pub type RecoverResult<T> = Result<T, RecoverError>;

/// Errors raised by orchestrator operations.
#[derive(Debug, Error)]
pub enum RecoverError {
    #[error("state store error: {0}")]
    State(#[from] StateError),
}
