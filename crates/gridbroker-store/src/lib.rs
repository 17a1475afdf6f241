//! # gridbroker-store
//!
//! The queue store: persistence and locking layer for command records.
//!
//! All mutation runs inside write transactions on a single SQLite
//! database; claiming is a transactional compare-and-swap, so the
//! at-most-one-claimant invariant holds across processes sharing the
//! database file.

pub mod error;
pub mod schema;
pub mod store;

pub use error::StoreError;
pub use store::{QueueStore, RuntimeDataRow};
