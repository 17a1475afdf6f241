//! # gridbroker-core
//!
//! Data model shared by the gridbroker daemon and store:
//!
//! - Command records and their lifecycle state machine
//! - Task records mirrored from command state
//! - The executor adapter contract implemented per backend

pub mod command;
pub mod error;
pub mod executor;
pub mod task;

pub use command::{Command, CommandAction, CommandStatus};
pub use error::CoreError;
pub use executor::{ExecutorAdapter, ExecutorError, SubmitOutcome, TargetState};
pub use task::{TaskFile, TaskRecord, WAITING_STATUS};
