//! Built-in executor adapters.
//!
//! Production deployments plug in an adapter for their grid or cloud
//! middleware; the echo adapter here accepts everything immediately and
//! exists so the daemon can run end to end without external services.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use gridbroker_core::{Command, ExecutorAdapter, ExecutorError, SubmitOutcome, TargetState};

/// An executor that accepts every submission and reports it finished on
/// the second status check.
pub struct EchoExecutor {
    seen: Mutex<HashMap<String, u32>>,
}

impl EchoExecutor {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for EchoExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutorAdapter for EchoExecutor {
    fn target(&self) -> &str {
        "echo"
    }

    async fn submit(&self, command: &Command) -> Result<SubmitOutcome, ExecutorError> {
        let target_id = format!("echo-{}", command.task_id);
        info!("Echo adapter accepted {} as {}", command, target_id);
        Ok(SubmitOutcome {
            target_id,
            target_status: Some("SUBMITTED".to_string()),
        })
    }

    async fn cancel(&self, command: &Command) -> Result<String, ExecutorError> {
        info!("Echo adapter cancelling {}", command);
        Ok("CANCELLING".to_string())
    }

    async fn check_status(&self, target_id: &str) -> Result<TargetState, ExecutorError> {
        let mut seen = self
            .seen
            .lock()
            .map_err(|e| ExecutorError::Backend(e.to_string()))?;
        let checks = seen.entry(target_id.to_string()).or_insert(0);
        *checks += 1;

        // Report RUNNING on the first check so the controller exercises
        // its touch path, then DONE.
        if *checks == 1 {
            Ok(TargetState::Running)
        } else {
            Ok(TargetState::Succeeded("DONE".to_string()))
        }
    }

    async fn fetch_output(&self, target_id: &str) -> Result<String, ExecutorError> {
        Ok(format!("echo/{target_id}"))
    }
}
