//! # gridbroker-daemon
//!
//! The two cooperating control loops of the broker:
//!
//! - the polling loop claims newly queued commands and hands each to a
//!   bounded worker that drives the executor adapter;
//! - the controller loop re-scans in-flight commands, reconciles them
//!   against the executor's authoritative state, and applies the
//!   retry/trash/finalize decision table.
//!
//! Both run independently against the same [`gridbroker_store::QueueStore`].

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod polling;

pub use config::DaemonConfig;
pub use controller::ControllerLoop;
pub use dispatch::{ActionHandler, CancelHandler, HandlerRegistry, SubmitHandler};
pub use error::DaemonError;
pub use polling::PollingLoop;
