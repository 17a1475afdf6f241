//! Task records mirrored from command state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task status written when the executor has not reported one yet.
///
/// The store's update propagation falls back to this sentinel whenever a
/// command carries no target status. Kept as a single named constant so
/// a future split of "unknown" from "waiting" touches one site.
pub const WAITING_STATUS: &str = "WAITING";

/// The owning logical unit a command acts on.
///
/// `status` is denormalized from the most recent command update for the
/// task; the store keeps the two in sync inside one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task identity.
    pub id: i64,
    /// Mirrored status (executor target status or [`WAITING_STATUS`]).
    pub status: String,
    /// Last mirror write.
    pub last_change: DateTime<Utc>,
    /// Input files owned by the task.
    pub input_files: Vec<TaskFile>,
    /// Output files owned by the task.
    pub output_files: Vec<TaskFile>,
    /// Command-line arguments owned by the task.
    pub arguments: Vec<String>,
}

/// A file attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFile {
    /// File name.
    pub name: String,
    /// Resolved path, once known.
    pub path: Option<String>,
}

impl TaskFile {
    /// File with no resolved path yet.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }

    /// File with a known path.
    pub fn at(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
        }
    }
}
