//! Core model errors.

use thiserror::Error;

/// Errors raised while decoding persisted model values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Stored action string does not match any supported action.
    #[error("Unknown command action: {0}")]
    UnknownAction(String),

    /// Stored status string does not match any lifecycle state.
    #[error("Unknown command status: {0}")]
    UnknownStatus(String),
}
