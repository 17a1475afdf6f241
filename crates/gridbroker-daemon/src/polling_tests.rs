use super::*;
use async_trait::async_trait;
use gridbroker_core::{Command, CommandAction, CommandStatus, ExecutorAdapter, ExecutorError, SubmitOutcome, TargetState};

struct AcceptingExecutor;

#[async_trait]
impl ExecutorAdapter for AcceptingExecutor {
    fn target(&self) -> &str {
        "mock"
    }

    async fn submit(&self, command: &Command) -> Result<SubmitOutcome, ExecutorError> {
        Ok(SubmitOutcome {
            target_id: format!("job-{}", command.task_id),
            target_status: Some("RUNNING".to_string()),
        })
    }

    async fn cancel(&self, _command: &Command) -> Result<String, ExecutorError> {
        Ok("CANCELLING".to_string())
    }

    async fn check_status(&self, _target_id: &str) -> Result<TargetState, ExecutorError> {
        Ok(TargetState::Running)
    }

    async fn fetch_output(&self, _target_id: &str) -> Result<String, ExecutorError> {
        Ok("output".to_string())
    }
}

async fn enqueue(store: &QueueStore, action: CommandAction) -> Command {
    let task_id = store.insert_task(vec![], vec![], vec![]).await.unwrap();
    let cmd = Command::new(task_id, "mock", action);
    store.insert_command(&cmd).await.unwrap();
    cmd
}

fn polling(store: Arc<QueueStore>, registry: HandlerRegistry) -> Arc<PollingLoop> {
    Arc::new(PollingLoop::new(
        store,
        Arc::new(registry),
        DaemonConfig::default(),
    ))
}

#[tokio::test]
async fn test_tick_claims_and_dispatches() {
    let store = Arc::new(QueueStore::in_memory().await.unwrap());
    let cmd = enqueue(&store, CommandAction::Submit).await;

    let registry = HandlerRegistry::standard(Arc::new(AcceptingExecutor), 3);
    let poll = polling(store.clone(), registry);

    let claimed = poll.tick().await.unwrap();
    assert_eq!(claimed, 1);

    // Workers are spawned; give them a moment.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let stored = store.command(cmd.task_id, cmd.action).await.unwrap().unwrap();
    assert_eq!(stored.status, CommandStatus::Processed);
    assert!(stored.target_id.is_some());
}

#[tokio::test]
async fn test_tick_with_empty_queue() {
    let store = Arc::new(QueueStore::in_memory().await.unwrap());
    let registry = HandlerRegistry::standard(Arc::new(AcceptingExecutor), 3);
    let poll = polling(store, registry);

    assert_eq!(poll.tick().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unsupported_action_is_logged_not_mutated() {
    let store = Arc::new(QueueStore::in_memory().await.unwrap());
    let cmd = enqueue(&store, CommandAction::GetStatus).await;

    let registry = HandlerRegistry::standard(Arc::new(AcceptingExecutor), 3);
    let poll = polling(store.clone(), registry);

    poll.tick().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // Claimed but never processed further: no target, no terminal state.
    let stored = store.command(cmd.task_id, cmd.action).await.unwrap().unwrap();
    assert_eq!(stored.status, CommandStatus::Processing);
    assert!(stored.target_id.is_none());
    assert!(store.runtime_data(cmd.task_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_loop_stops_on_shutdown_signal() {
    let store = Arc::new(QueueStore::in_memory().await.unwrap());
    let registry = HandlerRegistry::standard(Arc::new(AcceptingExecutor), 3);
    let poll = polling(store, registry);

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let handle = tokio::spawn(poll.run(shutdown_rx));

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("loop did not stop on shutdown")
        .unwrap();
}
