//! Controller loop: reconciles in-flight commands against the executor.
//!
//! The polling loop leaves commands PROCESSING/PROCESSED; this loop is
//! what eventually moves them to a terminal state, retries them, or
//! trashes them when the backend has lost track of the job.

use std::sync::Arc;

use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

use gridbroker_core::{Command, CommandAction, CommandStatus, ExecutorAdapter, TargetState};
use gridbroker_store::QueueStore;

use crate::config::DaemonConfig;
use crate::error::DaemonError;

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;

/// Periodically scans PROCESSING/PROCESSED commands and applies the
/// reconciliation decision table.
pub struct ControllerLoop {
    store: Arc<QueueStore>,
    adapter: Arc<dyn ExecutorAdapter>,
    config: DaemonConfig,
    workers: Arc<Semaphore>,
}

impl ControllerLoop {
    /// Create a controller loop over a store and adapter.
    pub fn new(
        store: Arc<QueueStore>,
        adapter: Arc<dyn ExecutorAdapter>,
        config: DaemonConfig,
    ) -> Self {
        let permits = config.max_workers as usize;
        Self {
            store,
            adapter,
            config,
            workers: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Run until the shutdown signal fires, independent of the polling
    /// loop's cadence.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Controller loop started (interval {:?}, batch {})",
            self.config.controller_interval(),
            self.config.controller_batch
        );
        let mut ticker = tokio::time::interval(self.config.controller_interval());

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Controller loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("Controller tick failed: {}", e);
                    }
                }
            }
        }
    }

    /// One tick: scan a batch of in-flight commands and reconcile each
    /// through a bounded worker. Returns the number scanned.
    pub async fn tick(self: &Arc<Self>) -> Result<usize, DaemonError> {
        let in_flight = self.store.scan_in_flight(self.config.controller_batch).await?;
        let count = in_flight.len();

        for command in in_flight {
            if !command.status.is_in_flight() {
                // Scan only returns in-flight rows; anything else means
                // the row changed under us between select and decode.
                debug!("Skipping {}: no longer in flight", command);
                continue;
            }

            let permit = self
                .workers
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| DaemonError::Worker(e.to_string()))?;
            let this = Arc::clone(self);

            tokio::spawn(async move {
                if let Err(e) = this.reconcile(&command).await {
                    error!("Reconciliation failed for {}: {}", command, e);
                }
                drop(permit);
            });
        }

        Ok(count)
    }

    /// Reconcile one command against the executor's authoritative view.
    ///
    /// Decision table: running targets get their check timestamp
    /// touched; confirmed successes finalize; confirmed failures retry
    /// until the budget is spent, then trash; lost targets trash.
    pub async fn reconcile(&self, command: &Command) -> Result<(), DaemonError> {
        let Some(target_id) = command.target_id.as_deref() else {
            // No executor identity: a worker is still driving the
            // submit, and its failure path retries or trashes on its
            // own. Just record the examination.
            self.store.touch_check_ts(command).await?;
            return Ok(());
        };

        let state = match self.adapter.check_status(target_id).await {
            Ok(state) => state,
            // An adapter failure is indistinguishable from a dead
            // backend job; feed it to the retry/trash decision.
            Err(e) => {
                warn!("Status check for {} failed: {}", command, e);
                TargetState::Failed(e.to_string())
            }
        };

        match state {
            TargetState::Running => {
                self.store.touch_check_ts(command).await?;
            }
            TargetState::Succeeded(target_status) => {
                self.finalize(command, target_id, target_status).await?;
            }
            TargetState::Failed(target_status) => {
                if command.retry < self.config.max_retry {
                    info!(
                        "Backend reported failure for {}; retrying (attempt {} of {})",
                        command,
                        command.retry + 1,
                        self.config.max_retry
                    );
                    self.store.retry(command).await?;
                } else {
                    warn!("Retry budget exhausted for {}; trashing", command);
                    self.store
                        .record_runtime_data("failure_reason", &target_status, None, command)
                        .await?;
                    self.store.trash(command).await?;
                }
            }
            TargetState::NotFound => {
                warn!("Target {} lost by the executor; trashing {}", target_id, command);
                self.store.trash(command).await?;
            }
        }

        Ok(())
    }

    /// Apply a confirmed terminal success: DONE for submits, CANCELLED
    /// for cancels, and for submits rewrite the task's output paths to
    /// where the executor put the results.
    async fn finalize(
        &self,
        command: &Command,
        target_id: &str,
        target_status: String,
    ) -> Result<(), DaemonError> {
        let mut finished = command.clone();
        finished.status = match command.action {
            CommandAction::JobCancel => CommandStatus::Cancelled,
            _ => CommandStatus::Done,
        };
        finished.target_status = Some(target_status);
        self.store.update(&finished).await?;

        if command.action == CommandAction::Submit {
            match self.adapter.fetch_output(target_id).await {
                Ok(output_dir) => {
                    self.store.update_output_paths(command, &output_dir).await?;
                }
                Err(e) => {
                    warn!("Output location unavailable for {}: {}", command, e);
                }
            }
        }

        info!("Finalized {}", finished);
        Ok(())
    }
}
