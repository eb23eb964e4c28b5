use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::domain::{Actor, Metadata, Workflow, WorkflowId, WorkflowState};
use super::service::{StateUpdate, WorkflowError, WorkflowService};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub workflow_ids: Vec<WorkflowId>,
    pub new_state: WorkflowState,
    pub updated_by: Actor,
    #[serde(default)]
    pub transition_metadata: Metadata,
}

/// Shared flag a caller flips to stop dispatching the remaining ids of a batch.
/// Transitions already handed to a worker always run to completion.
#[derive(Debug, Clone, Default)]
pub struct BatchCancellation(Arc<AtomicBool>);

impl BatchCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum BatchItemOutcome {
    Applied(Workflow),
    Failed(WorkflowError),
    Cancelled,
}

impl BatchItemOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, BatchItemOutcome::Applied(_))
    }
}

enum Pending {
    Dispatched(JoinHandle<Result<Workflow, WorkflowError>>),
    /// Later occurrence of an id already in the batch; only the first runs.
    Repeated,
    Skipped,
}

/// Per-id outcomes in request order. A repeated id appears once per occurrence.
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<(WorkflowId, BatchItemOutcome)>,
}

impl BatchReport {
    pub fn successes(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.succeeded())
            .count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.len() - self.successes()
    }

    pub fn outcome(&self, id: &WorkflowId) -> Option<&BatchItemOutcome> {
        self.outcomes
            .iter()
            .find(|(candidate, _)| candidate == id)
            .map(|(_, outcome)| outcome)
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for (id, outcome) in &self.outcomes {
            // The first occurrence of an id decides its result.
            summary
                .results
                .entry(id.clone())
                .or_insert_with(|| outcome.succeeded());
            match outcome {
                BatchItemOutcome::Applied(_) => {}
                BatchItemOutcome::Failed(error) => {
                    summary.failed_workflows.push(id.clone());
                    summary.error_messages.push(format!("{id}: {error}"));
                }
                BatchItemOutcome::Cancelled => {
                    summary.failed_workflows.push(id.clone());
                    summary
                        .error_messages
                        .push(format!("{id}: cancelled before dispatch"));
                }
            }
        }
        summary
    }
}

/// Wire shape returned to batch callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub results: BTreeMap<WorkflowId, bool>,
    pub failed_workflows: Vec<WorkflowId>,
    pub error_messages: Vec<String>,
}

/// Fans one target transition out across many workflows. Each id runs the
/// single-workflow path on its own blocking worker; one failure never affects
/// another id.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    service: Arc<WorkflowService>,
}

impl BatchCoordinator {
    pub fn new(service: Arc<WorkflowService>) -> Self {
        Self { service }
    }

    pub async fn batch_update(
        &self,
        request: BatchRequest,
        cancellation: &BatchCancellation,
    ) -> Result<BatchReport, WorkflowError> {
        self.validate(&request)?;

        let mut seen = BTreeSet::new();
        let mut pending = Vec::with_capacity(request.workflow_ids.len());
        for id in request.workflow_ids {
            if !seen.insert(id.clone()) {
                pending.push((id, Pending::Repeated));
                continue;
            }
            if cancellation.is_cancelled() {
                pending.push((id, Pending::Skipped));
                continue;
            }
            let service = self.service.clone();
            let update = StateUpdate::new(
                request.new_state,
                request.updated_by.clone(),
                request.transition_metadata.clone(),
            );
            let worker_id = id.clone();
            let handle =
                tokio::task::spawn_blocking(move || service.update_state(&worker_id, update));
            pending.push((id, Pending::Dispatched(handle)));
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for (id, item) in pending {
            let outcome = match item {
                Pending::Repeated => BatchItemOutcome::Failed(WorkflowError::Validation(format!(
                    "workflow {id} appears more than once in the batch"
                ))),
                Pending::Skipped => BatchItemOutcome::Cancelled,
                Pending::Dispatched(handle) => match handle.await {
                    Ok(Ok(workflow)) => BatchItemOutcome::Applied(workflow),
                    Ok(Err(error)) => BatchItemOutcome::Failed(error),
                    Err(join_error) => {
                        warn!(workflow_id = %id, "batch worker aborted: {join_error}");
                        BatchItemOutcome::Failed(WorkflowError::Worker(join_error.to_string()))
                    }
                },
            };
            outcomes.push((id, outcome));
        }

        let report = BatchReport { outcomes };
        info!(
            target_state = %request.new_state,
            succeeded = report.successes(),
            failed = report.failures(),
            "batch update finished"
        );
        Ok(report)
    }

    fn validate(&self, request: &BatchRequest) -> Result<(), WorkflowError> {
        let max = self.service.settings().max_batch_size;
        if request.workflow_ids.is_empty() {
            return Err(WorkflowError::Validation(
                "workflow_ids must not be empty".to_string(),
            ));
        }
        if request.workflow_ids.len() > max {
            return Err(WorkflowError::Validation(format!(
                "batch of {} exceeds the maximum of {max}",
                request.workflow_ids.len()
            )));
        }
        Ok(())
    }
}
