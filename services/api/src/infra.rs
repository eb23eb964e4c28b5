use enrollment_workflow::config::AppConfig;
use enrollment_workflow::error::AppError;
use enrollment_workflow::workflows::enrollment::{
    Collaborators, InMemoryHistoryLedger, InMemoryWorkflowStore, NotificationDispatcher,
    NotifyError, PredicateRegistry, StateMachine, StaticApplicationRegistry, SystemClock,
    WorkflowEvent, WorkflowService,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Hands workflow events to an async consumer without blocking the committing thread.
#[derive(Clone)]
pub(crate) struct ChannelNotifier {
    sender: UnboundedSender<WorkflowEvent>,
}

impl ChannelNotifier {
    pub(crate) fn new() -> (Self, UnboundedReceiver<WorkflowEvent>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationDispatcher for ChannelNotifier {
    fn emit(&self, event: WorkflowEvent) -> Result<(), NotifyError> {
        self.sender.send(event).map_err(|_| NotifyError::Closed)
    }
}

/// Drains the event channel into the log until every sender is dropped.
pub(crate) fn spawn_event_logger(mut events: UnboundedReceiver<WorkflowEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(
                event = event.kind.label(),
                workflow_id = %event.workflow_id,
                payload = %event.payload,
                "workflow event"
            );
        }
    })
}

/// Service over process-local storage with the configured rule table.
pub(crate) fn build_service(
    config: &AppConfig,
    notifier: ChannelNotifier,
) -> Result<Arc<WorkflowService>, AppError> {
    let table = config.workflow.rule_table()?;
    let machine = StateMachine::new(table, PredicateRegistry::with_builtins())?;
    let collaborators = Collaborators {
        store: Arc::new(InMemoryWorkflowStore::new()),
        ledger: Arc::new(InMemoryHistoryLedger::new()),
        notifier: Arc::new(notifier),
        registry: Arc::new(StaticApplicationRegistry::allow_any()),
        clock: Arc::new(SystemClock),
    };
    Ok(Arc::new(WorkflowService::new(
        machine,
        collaborators,
        config.workflow.engine_settings(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use enrollment_workflow::workflows::enrollment::{WorkflowEventKind, WorkflowId};
    use serde_json::json;

    fn event() -> WorkflowEvent {
        WorkflowEvent {
            kind: WorkflowEventKind::Created,
            workflow_id: WorkflowId("wf-000001".to_string()),
            payload: json!({ "state": "CREATED" }),
            emitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn channel_notifier_forwards_events() {
        let (notifier, mut receiver) = ChannelNotifier::new();

        notifier.emit(event()).expect("channel open");

        let received = receiver.recv().await.expect("event delivered");
        assert_eq!(received.workflow_id, WorkflowId("wf-000001".to_string()));
    }

    #[test]
    fn channel_notifier_reports_closed_receivers() {
        let (notifier, receiver) = ChannelNotifier::new();
        drop(receiver);

        assert!(matches!(notifier.emit(event()), Err(NotifyError::Closed)));
    }
}
