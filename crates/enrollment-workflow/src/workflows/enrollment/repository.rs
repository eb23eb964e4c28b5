use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{ApplicationId, Workflow, WorkflowId, WorkflowState};

/// Versioned storage for workflows. Implementations must reject a put whose
/// expected version no longer matches the stored one.
pub trait WorkflowStore: Send + Sync {
    /// Stores a new workflow and returns it with its initial version. An application
    /// is tracked by at most one workflow; the check and the write are atomic.
    fn insert(&self, workflow: Workflow) -> Result<Workflow, StoreError>;

    fn get_by_id_with_version(&self, id: &WorkflowId) -> Result<(Workflow, u64), StoreError>;

    /// Writes `workflow` if the stored version still equals `expected_version`,
    /// returning the workflow with its new version.
    fn put_with_version_check(
        &self,
        workflow: Workflow,
        expected_version: u64,
    ) -> Result<Workflow, StoreError>;

    fn list_by_filter(&self, filter: &WorkflowFilter) -> Result<Vec<Workflow>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("workflow {0} already exists")]
    Duplicate(WorkflowId),
    #[error("application {application_id} is already tracked by workflow {workflow_id}")]
    ApplicationTracked {
        application_id: ApplicationId,
        workflow_id: WorkflowId,
    },
    #[error("workflow {id} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        id: WorkflowId,
        expected: u64,
        actual: u64,
    },
    #[error("workflow {0} not found")]
    NotFound(WorkflowId),
    #[error("workflow store unavailable: {0}")]
    Unavailable(String),
}

/// Conjunctive filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowFilter {
    #[serde(default)]
    pub state: Option<WorkflowState>,
    #[serde(default)]
    pub application_id: Option<ApplicationId>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

impl WorkflowFilter {
    pub fn matches(&self, workflow: &Workflow) -> bool {
        self.state
            .map(|state| workflow.current_state == state)
            .unwrap_or(true)
            && self
                .application_id
                .as_ref()
                .map(|id| &workflow.application_id == id)
                .unwrap_or(true)
            && self
                .assigned_to
                .as_ref()
                .map(|reviewer| workflow.assigned_to.as_ref() == Some(reviewer))
                .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEventKind {
    #[serde(rename = "workflow.created")]
    Created,
    #[serde(rename = "workflow.transitioned")]
    Transitioned,
    #[serde(rename = "workflow.assigned")]
    Assigned,
}

impl WorkflowEventKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Created => "workflow.created",
            Self::Transitioned => "workflow.transitioned",
            Self::Assigned => "workflow.assigned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub kind: WorkflowEventKind,
    pub workflow_id: WorkflowId,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

/// Fire-and-forget outbound events. Implementations must not block the caller.
pub trait NotificationDispatcher: Send + Sync {
    fn emit(&self, event: WorkflowEvent) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification channel closed")]
    Closed,
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Existence check against the external application records.
pub trait ApplicationRegistry: Send + Sync {
    fn application_exists(&self, id: &ApplicationId) -> Result<bool, RegistryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("application registry unavailable: {0}")]
    Unavailable(String),
}
