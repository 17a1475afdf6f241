//! Command record and lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Operations a command can request against a task.
///
/// GETSTATUS and GETOUTPUT are synchronous read paths served by the
/// request-intake layer; they never register as claimable queue rows in
/// steady operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandAction {
    /// Submit the task to the backend executor.
    #[serde(rename = "SUBMIT")]
    Submit,
    /// Read-only task status view.
    #[serde(rename = "GETSTATUS")]
    GetStatus,
    /// Read-only task output view.
    #[serde(rename = "GETOUTPUT")]
    GetOutput,
    /// Cancel a task already accepted by the executor.
    #[serde(rename = "JOBCANCEL")]
    JobCancel,
}

impl CommandAction {
    /// Stored representation of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandAction::Submit => "SUBMIT",
            CommandAction::GetStatus => "GETSTATUS",
            CommandAction::GetOutput => "GETOUTPUT",
            CommandAction::JobCancel => "JOBCANCEL",
        }
    }

    /// All actions the queue recognizes, in stored form.
    pub const ALL: [CommandAction; 4] = [
        CommandAction::Submit,
        CommandAction::GetStatus,
        CommandAction::GetOutput,
        CommandAction::JobCancel,
    ];
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMIT" => Ok(CommandAction::Submit),
            "GETSTATUS" => Ok(CommandAction::GetStatus),
            "GETOUTPUT" => Ok(CommandAction::GetOutput),
            "JOBCANCEL" => Ok(CommandAction::JobCancel),
            other => Err(CoreError::UnknownAction(other.to_string())),
        }
    }
}

/// Command lifecycle states.
///
/// QUEUED is the initial state; DONE, FAILED and CANCELLED are terminal.
/// QUEUED is re-enterable from PROCESSING/PROCESSED only through the
/// store's retry operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandStatus {
    /// Waiting to be claimed by the polling loop.
    #[serde(rename = "QUEUED")]
    Queued,
    /// Claimed; a worker is driving the executor call.
    #[serde(rename = "PROCESSING")]
    Processing,
    /// The executor accepted the underlying operation.
    #[serde(rename = "PROCESSED")]
    Processed,
    /// Terminal failure.
    #[serde(rename = "FAILED")]
    Failed,
    /// Terminal success.
    #[serde(rename = "DONE")]
    Done,
    /// Terminal cancellation.
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl CommandStatus {
    /// Stored representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Queued => "QUEUED",
            CommandStatus::Processing => "PROCESSING",
            CommandStatus::Processed => "PROCESSED",
            CommandStatus::Failed => "FAILED",
            CommandStatus::Done => "DONE",
            CommandStatus::Cancelled => "CANCELLED",
        }
    }

    /// Terminal states admit no further automatic transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Done | CommandStatus::Failed | CommandStatus::Cancelled
        )
    }

    /// In-flight states are the ones the controller loop reconciles.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, CommandStatus::Processing | CommandStatus::Processed)
    }

    /// Whether the lifecycle state machine admits `self -> next`.
    ///
    /// The only backward edge is the retry transition back to QUEUED from
    /// an in-flight state.
    pub fn can_transition(&self, next: CommandStatus) -> bool {
        use CommandStatus::*;
        match (self, next) {
            (Queued, Processing) => true,
            (Processing, Processed) | (Processing, Failed) => true,
            (Processed, Done) | (Processed, Failed) | (Processed, Cancelled) => true,
            // Retry edge
            (Processing, Queued) | (Processed, Queued) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(CommandStatus::Queued),
            "PROCESSING" => Ok(CommandStatus::Processing),
            "PROCESSED" => Ok(CommandStatus::Processed),
            "FAILED" => Ok(CommandStatus::Failed),
            "DONE" => Ok(CommandStatus::Done),
            "CANCELLED" => Ok(CommandStatus::Cancelled),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// One queued operation against a task.
///
/// The correlation key is `(task_id, action)`; at most one live
/// (non-terminal) command exists per pair at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Identity of the logical task; stable across retries.
    pub task_id: i64,
    /// Identity assigned by the executor once accepted.
    pub target_id: Option<String>,
    /// Name of the executor interface owning this task.
    pub target: String,
    /// Requested operation.
    pub action: CommandAction,
    /// Queue lifecycle state.
    pub status: CommandStatus,
    /// Status as last observed from the executor; may lag `status`
    /// until the controller loop reconciles.
    pub target_status: Option<String>,
    /// Retry attempt counter; only ever increases.
    pub retry: u32,
    /// Queued-at timestamp.
    pub creation: DateTime<Utc>,
    /// Last-mutated-at timestamp.
    pub last_change: DateTime<Utc>,
    /// Last consistency-check timestamp.
    pub check_ts: DateTime<Utc>,
    /// Opaque payload interpreted by the executor (e.g. output base path).
    pub action_info: String,
}

impl Command {
    /// Create a new QUEUED command.
    pub fn new(task_id: i64, target: impl Into<String>, action: CommandAction) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            target_id: None,
            target: target.into(),
            action,
            status: CommandStatus::Queued,
            target_status: None,
            retry: 0,
            creation: now,
            last_change: now,
            check_ts: now,
            action_info: String::new(),
        }
    }

    /// Set the executor payload.
    pub fn with_action_info(mut self, info: impl Into<String>) -> Self {
        self.action_info = info.into();
        self
    }

    /// Whether this command reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} {} [{}] target={:?} retry={}",
            self.task_id, self.action, self.status, self.target_id, self.retry
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip() {
        for action in CommandAction::ALL {
            assert_eq!(action.as_str().parse::<CommandAction>().unwrap(), action);
        }
        assert!("RESTART".parse::<CommandAction>().is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for s in ["QUEUED", "PROCESSING", "PROCESSED", "FAILED", "DONE", "CANCELLED"] {
            assert_eq!(s.parse::<CommandStatus>().unwrap().as_str(), s);
        }
        assert!("PENDING".parse::<CommandStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(CommandStatus::Done.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
        assert!(CommandStatus::Cancelled.is_terminal());
        assert!(!CommandStatus::Queued.is_terminal());
        assert!(!CommandStatus::Processing.is_terminal());
    }

    #[test]
    fn test_lifecycle_edges() {
        use CommandStatus::*;

        assert!(Queued.can_transition(Processing));
        assert!(Processing.can_transition(Processed));
        assert!(Processing.can_transition(Failed));
        assert!(Processed.can_transition(Done));
        assert!(Processed.can_transition(Cancelled));

        // Retry is the only backward edge.
        assert!(Processing.can_transition(Queued));
        assert!(Processed.can_transition(Queued));
        assert!(!Done.can_transition(Queued));
        assert!(!Failed.can_transition(Queued));

        // A command cannot fail before being claimed.
        assert!(!Queued.can_transition(Failed));
        // Terminal states admit nothing.
        assert!(!Cancelled.can_transition(Processing));
    }

    #[test]
    fn test_command_new() {
        let cmd = Command::new(42, "slurm", CommandAction::Submit)
            .with_action_info("/srv/jobs/42");
        assert_eq!(cmd.task_id, 42);
        assert_eq!(cmd.status, CommandStatus::Queued);
        assert_eq!(cmd.retry, 0);
        assert!(cmd.target_id.is_none());
        assert_eq!(cmd.action_info, "/srv/jobs/42");
    }
}
