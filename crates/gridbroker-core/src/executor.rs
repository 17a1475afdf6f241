//! Executor adapter contract.
//!
//! The broker core never talks to a backend scheduler directly; each
//! backend ships an [`ExecutorAdapter`] implementation and the two
//! control loops drive commands through it.

use async_trait::async_trait;
use thiserror::Error;

use crate::command::Command;

/// Errors surfaced by a backend adapter.
///
/// The controller loop treats any adapter error as a terminal-failure
/// input to its retry/trash decision.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The backend rejected or could not perform the operation.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The backend could not be reached.
    #[error("Backend unreachable: {0}")]
    Unreachable(String),
}

/// Result of a successful submit.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Identity the executor assigned to the accepted job.
    pub target_id: String,
    /// Executor-native status at acceptance time, when reported.
    pub target_status: Option<String>,
}

/// Authoritative state of a target as reported by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetState {
    /// Still running; nothing to reconcile.
    Running,
    /// Terminal success, with the executor-native status.
    Succeeded(String),
    /// Terminal failure, with the executor-native status.
    Failed(String),
    /// The executor no longer knows the target.
    NotFound,
}

/// Backend-specific capability performing the actual submit, cancel,
/// status and output operations.
#[async_trait]
pub trait ExecutorAdapter: Send + Sync {
    /// Name of the execution interface this adapter serves; matched
    /// against `Command::target`.
    fn target(&self) -> &str;

    /// Begin execution of the command's task.
    async fn submit(&self, command: &Command) -> Result<SubmitOutcome, ExecutorError>;

    /// Cancel the command's already-assigned target. Returns the
    /// executor-native status after the cancel request.
    async fn cancel(&self, command: &Command) -> Result<String, ExecutorError>;

    /// Authoritative current state of a target.
    async fn check_status(&self, target_id: &str) -> Result<TargetState, ExecutorError>;

    /// Location descriptor of the target's output, used when finalizing
    /// a submit and by the read-only GETOUTPUT path.
    async fn fetch_output(&self, target_id: &str) -> Result<String, ExecutorError>;
}
