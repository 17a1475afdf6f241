//! Daemon errors.

use thiserror::Error;

use gridbroker_core::ExecutorError;
use gridbroker_store::StoreError;

/// Daemon error types.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Queue store failure; the current tick aborts and the next tick
    /// retries.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Executor adapter failure.
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Worker pool failure.
    #[error("Worker error: {0}")]
    Worker(String),
}
