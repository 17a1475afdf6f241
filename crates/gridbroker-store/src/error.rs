//! Store errors.

use thiserror::Error;

/// Queue store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database could not be opened or reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Statement or transaction failure; nothing partial was committed.
    #[error("Query error: {0}")]
    Query(String),
}
