//! Action handler dispatch.
//!
//! Each claimable action has its own handler implementation; the polling
//! loop resolves handlers through a registry, so adding an action means
//! registering a handler, not editing the loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use gridbroker_core::{Command, CommandAction, CommandStatus, ExecutorAdapter};
use gridbroker_store::QueueStore;

use crate::error::DaemonError;

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;

/// Executes one claimed command against the backend.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The action this handler serves.
    fn action(&self) -> CommandAction;

    /// Drive the command through the executor and record the result.
    async fn handle(&self, command: &Command, store: &QueueStore) -> Result<(), DaemonError>;
}

/// Handlers keyed by action.
pub struct HandlerRegistry {
    handlers: HashMap<CommandAction, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the standard submit and cancel handlers bound to
    /// one adapter; `max_retry` bounds the submit failure recovery.
    /// GETSTATUS and GETOUTPUT are read paths and have no handler on
    /// purpose.
    pub fn standard(adapter: Arc<dyn ExecutorAdapter>, max_retry: u32) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SubmitHandler::new(adapter.clone(), max_retry)));
        registry.register(Arc::new(CancelHandler::new(adapter)));
        registry
    }

    /// Register a handler for its action.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.action(), handler);
    }

    /// Resolve the handler for an action.
    pub fn get(&self, action: CommandAction) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&action).cloned()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles SUBMIT: asks the adapter to begin execution and records the
/// assigned target id.
///
/// A refused submit leaves no target id for the controller to check
/// against, so this handler applies the retry/trash decision itself:
/// requeue while the budget allows, trash once it is spent.
pub struct SubmitHandler {
    adapter: Arc<dyn ExecutorAdapter>,
    max_retry: u32,
}

impl SubmitHandler {
    /// Create a submit handler over an adapter with a retry budget.
    pub fn new(adapter: Arc<dyn ExecutorAdapter>, max_retry: u32) -> Self {
        Self { adapter, max_retry }
    }
}

#[async_trait]
impl ActionHandler for SubmitHandler {
    fn action(&self) -> CommandAction {
        CommandAction::Submit
    }

    async fn handle(&self, command: &Command, store: &QueueStore) -> Result<(), DaemonError> {
        debug!("Submitting {}", command);
        match self.adapter.submit(command).await {
            Ok(outcome) => {
                let mut accepted = command.clone();
                accepted.target_id = Some(outcome.target_id);
                accepted.status = CommandStatus::Processed;
                accepted.target_status = outcome.target_status;
                store.update(&accepted).await?;
                debug!("Submit accepted: {}", accepted);
            }
            Err(e) => {
                warn!("Submit for task {} failed at the backend: {}", command.task_id, e);
                store
                    .record_runtime_data("submit_error", &e.to_string(), None, command)
                    .await?;
                if command.retry < self.max_retry {
                    info!(
                        "Requeueing refused submit for task {} (attempt {} of {})",
                        command.task_id,
                        command.retry + 1,
                        self.max_retry
                    );
                    store.retry(command).await?;
                } else {
                    warn!("Retry budget exhausted for {}; trashing", command);
                    store.trash(command).await?;
                }
            }
        }
        Ok(())
    }
}

/// Handles JOBCANCEL: asks the adapter to cancel the assigned target.
/// The terminal CANCELLED state is applied later by the controller's
/// reconciliation, not here.
pub struct CancelHandler {
    adapter: Arc<dyn ExecutorAdapter>,
}

impl CancelHandler {
    /// Create a cancel handler over an adapter.
    pub fn new(adapter: Arc<dyn ExecutorAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl ActionHandler for CancelHandler {
    fn action(&self) -> CommandAction {
        CommandAction::JobCancel
    }

    async fn handle(&self, command: &Command, store: &QueueStore) -> Result<(), DaemonError> {
        debug!("Cancelling {}", command);
        match self.adapter.cancel(command).await {
            Ok(target_status) => {
                let mut cancelling = command.clone();
                cancelling.status = CommandStatus::Processed;
                cancelling.target_status = Some(target_status);
                store.update(&cancelling).await?;
                debug!("Cancel accepted: {}", cancelling);
            }
            Err(e) => {
                warn!("Cancel for task {} failed at the backend: {}", command.task_id, e);
                store
                    .record_runtime_data("cancel_error", &e.to_string(), None, command)
                    .await?;
            }
        }
        Ok(())
    }
}
