//! Polling loop: claims queued commands and fans them out to workers.

use std::sync::Arc;

use tokio::sync::{broadcast, Semaphore};
use tracing::{error, info, warn};

use gridbroker_store::QueueStore;

use crate::config::DaemonConfig;
use crate::dispatch::HandlerRegistry;
use crate::error::DaemonError;

#[cfg(test)]
#[path = "polling_tests.rs"]
mod tests;

/// Periodically claims QUEUED commands and dispatches each to a bounded
/// worker. Claiming is exclusive at the store level, so any number of
/// polling loops (in this process or another) can share one queue.
pub struct PollingLoop {
    store: Arc<QueueStore>,
    registry: Arc<HandlerRegistry>,
    config: DaemonConfig,
    workers: Arc<Semaphore>,
}

impl PollingLoop {
    /// Create a polling loop over a store and handler registry.
    pub fn new(store: Arc<QueueStore>, registry: Arc<HandlerRegistry>, config: DaemonConfig) -> Self {
        let permits = config.max_workers as usize;
        Self {
            store,
            registry,
            config,
            workers: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Run until the shutdown signal fires. Termination is cooperative:
    /// the signal is only checked between ticks, and adapter calls in
    /// flight are left to finish.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Polling loop started (interval {:?}, batch {})",
            self.config.polling_interval(),
            self.config.polling_batch
        );
        let mut ticker = tokio::time::interval(self.config.polling_interval());

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Polling loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("Polling tick failed: {}", e);
                    }
                }
            }
        }
    }

    /// One tick: claim a batch and dispatch each claimed command.
    /// Returns the number of commands claimed.
    pub async fn tick(&self) -> Result<usize, DaemonError> {
        let claimed = self.store.claim_queued(self.config.polling_batch).await?;
        let count = claimed.len();

        for command in claimed {
            let Some(handler) = self.registry.get(command.action) else {
                // GETSTATUS/GETOUTPUT are synchronous read paths and
                // should never register as queue rows; anything else
                // unhandled stays put for an operator to inspect.
                warn!(
                    "Unsupported queued action {} for task {}; leaving row alone",
                    command.action, command.task_id
                );
                continue;
            };

            let permit = self
                .workers
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| DaemonError::Worker(e.to_string()))?;
            let store = self.store.clone();

            tokio::spawn(async move {
                if let Err(e) = handler.handle(&command, &store).await {
                    error!("Worker failed processing {}: {}", command, e);
                }
                drop(permit);
            });
        }

        Ok(count)
    }
}
