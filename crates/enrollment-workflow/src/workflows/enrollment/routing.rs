use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{ActorRole, AssignmentRecord, RoutingConfig, Workflow, WorkflowState};

/// Fallback SLA hours for states when a workflow's routing config sets none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlaDefaults {
    per_state: BTreeMap<WorkflowState, u32>,
}

impl SlaDefaults {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        Self::none()
            .with(WorkflowState::DocumentVerification, 48)
            .with(WorkflowState::AcademicReview, 72)
            .with(WorkflowState::FinalReview, 24)
    }

    pub fn with(mut self, state: WorkflowState, hours: u32) -> Self {
        self.per_state.insert(state, hours);
        self
    }

    pub fn hours_for(&self, state: WorkflowState) -> Option<u32> {
        self.per_state.get(&state).copied()
    }
}

/// Computed SLA position of a workflow in its current state. Report-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaStatus {
    pub state: WorkflowState,
    pub entered_at: DateTime<Utc>,
    pub elapsed_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla_hours: Option<u32>,
    pub breached: bool,
}

/// Reviewer assignment, routing configuration, and SLA exposure.
///
/// Operates on an already-loaded workflow; the service owns the versioned
/// read-modify-write around each call.
#[derive(Debug, Clone, Default)]
pub struct RoutingEngine {
    sla_defaults: SlaDefaults,
}

impl RoutingEngine {
    pub fn new(sla_defaults: SlaDefaults) -> Self {
        Self { sla_defaults }
    }

    pub fn sla_defaults(&self) -> &SlaDefaults {
        &self.sla_defaults
    }

    /// Does not check whether the caller may assign; that is the caller's concern.
    pub fn assign(
        &self,
        workflow: &mut Workflow,
        reviewer_id: impl Into<String>,
        role: ActorRole,
        now: DateTime<Utc>,
    ) -> AssignmentRecord {
        let record = AssignmentRecord {
            reviewer_id: reviewer_id.into(),
            role,
            timestamp: now,
        };
        workflow.assigned_to = Some(record.reviewer_id.clone());
        workflow.metrics.assignment_history.push(record.clone());
        workflow.updated_at = now;
        record
    }

    /// Replaces the routing config wholesale; nothing from the previous config survives.
    pub fn configure(&self, workflow: &mut Workflow, config: RoutingConfig, now: DateTime<Utc>) {
        workflow.routing_config = config;
        workflow.updated_at = now;
    }

    /// Assigns the reviewer configured for the workflow's current state, if any.
    pub fn apply_routing_rule(
        &self,
        workflow: &mut Workflow,
        now: DateTime<Utc>,
    ) -> Option<AssignmentRecord> {
        let target = workflow
            .routing_config
            .assignments
            .get(&workflow.current_state)
            .cloned()?;
        Some(self.assign(workflow, target.reviewer_id, target.role, now))
    }

    pub fn sla_hours(&self, workflow: &Workflow) -> Option<u32> {
        workflow
            .routing_config
            .sla_hours
            .or_else(|| self.sla_defaults.hours_for(workflow.current_state))
    }

    pub fn sla_status(&self, workflow: &Workflow, now: DateTime<Utc>) -> SlaStatus {
        let entered_at = workflow.entered_current_state_at();
        let elapsed_seconds = now
            .signed_duration_since(entered_at)
            .num_seconds()
            .max(0) as u64;
        let sla_hours = self.sla_hours(workflow);
        let breached = sla_hours
            .map(|hours| elapsed_seconds > u64::from(hours) * 3_600)
            .unwrap_or(false);

        SlaStatus {
            state: workflow.current_state,
            entered_at,
            elapsed_seconds,
            sla_hours,
            breached,
        }
    }

    /// Status for a workflow parked in a terminal state: the clock still reads,
    /// but no SLA applies and nothing can breach.
    pub fn archived_status(&self, workflow: &Workflow, now: DateTime<Utc>) -> SlaStatus {
        SlaStatus {
            sla_hours: None,
            breached: false,
            ..self.sla_status(workflow, now)
        }
    }
}
