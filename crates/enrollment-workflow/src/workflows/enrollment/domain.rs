use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form key/value payload accumulated across transitions.
pub type Metadata = BTreeMap<String, Value>;

/// Identifier wrapper for workflow instances.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the external application record a workflow tracks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Review lifecycle states. Which of them are reachable, and which are terminal,
/// is decided by the injected rule table rather than by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Created,
    DocumentVerification,
    AcademicReview,
    FinalReview,
    Approved,
    Waitlisted,
    EnrollmentConfirmed,
    Rejected,
    Cancelled,
    Completed,
}

impl WorkflowState {
    pub const fn ordered() -> [Self; 10] {
        [
            Self::Created,
            Self::DocumentVerification,
            Self::AcademicReview,
            Self::FinalReview,
            Self::Approved,
            Self::Waitlisted,
            Self::EnrollmentConfirmed,
            Self::Rejected,
            Self::Cancelled,
            Self::Completed,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::DocumentVerification => "DOCUMENT_VERIFICATION",
            Self::AcademicReview => "ACADEMIC_REVIEW",
            Self::FinalReview => "FINAL_REVIEW",
            Self::Approved => "APPROVED",
            Self::Waitlisted => "WAITLISTED",
            Self::EnrollmentConfirmed => "ENROLLMENT_CONFIRMED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        }
    }

    /// Status reported back to the application registry for this stage.
    pub const fn application_status(self) -> ApplicationStatus {
        match self {
            Self::Created => ApplicationStatus::Submitted,
            Self::DocumentVerification
            | Self::AcademicReview
            | Self::FinalReview
            | Self::Waitlisted => ApplicationStatus::UnderReview,
            Self::Approved | Self::EnrollmentConfirmed | Self::Completed => {
                ApplicationStatus::Approved
            }
            Self::Rejected => ApplicationStatus::Rejected,
            Self::Cancelled => ApplicationStatus::Withdrawn,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Submitted,
    UnderReview,
    Approved,
    Rejected,
    Withdrawn,
}

/// Roles an actor may present when requesting a transition or an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    Admin,
    DocumentVerifier,
    AcademicReviewer,
    AdmissionsOfficer,
    EnrollmentOfficer,
    System,
}

impl ActorRole {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::DocumentVerifier => "DOCUMENT_VERIFIER",
            Self::AcademicReviewer => "ACADEMIC_REVIEWER",
            Self::AdmissionsOfficer => "ADMISSIONS_OFFICER",
            Self::EnrollmentOfficer => "ENROLLMENT_OFFICER",
            Self::System => "SYSTEM",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Caller-supplied identity. The engine trusts it; authentication happens upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn system() -> Self {
        Self::new("system", ActorRole::System)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// One committed transition. The creation record has no `from_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_state: Option<WorkflowState>,
    pub to_state: WorkflowState,
    pub actor_id: String,
    pub actor_role: ActorRole,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn is_transition(&self) -> bool {
        self.from_state.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub reviewer_id: String,
    pub role: ActorRole,
    pub timestamp: DateTime<Utc>,
}

/// Reviewer that should pick up a workflow when it enters a given state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTarget {
    pub reviewer_id: String,
    pub role: ActorRole,
}

/// Per-workflow routing settings; replaced wholesale on every update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub assignments: BTreeMap<WorkflowState, RouteTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_hours: Option<u32>,
    #[serde(default)]
    pub auto_transition_enabled: bool,
}

/// Derived counters. Only the metrics aggregator and routing engine write here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    /// Seconds spent in each exited state.
    #[serde(default)]
    pub time_in_state: BTreeMap<WorkflowState, u64>,
    #[serde(default)]
    pub total_transitions: u64,
    #[serde(default)]
    pub assignment_history: Vec<AssignmentRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub application_id: ApplicationId,
    pub current_state: WorkflowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub state_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub routing_config: RoutingConfig,
    #[serde(default)]
    pub metrics: WorkflowMetrics,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Builds a fresh workflow whose history holds the creation record only.
    pub fn open(
        id: WorkflowId,
        application_id: ApplicationId,
        initial_state: WorkflowState,
        draft: WorkflowDraft,
        created_by: &Actor,
        now: DateTime<Utc>,
    ) -> Self {
        let creation = HistoryEntry {
            from_state: None,
            to_state: initial_state,
            actor_id: created_by.id.clone(),
            actor_role: created_by.role,
            metadata: draft.metadata.clone(),
            timestamp: now,
        };

        Self {
            id,
            application_id,
            current_state: initial_state,
            assigned_to: None,
            priority: draft.priority,
            state_history: vec![creation],
            routing_config: draft.routing_config,
            metrics: WorkflowMetrics::default(),
            metadata: draft.metadata,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Timestamp at which the workflow entered `current_state`.
    pub fn entered_current_state_at(&self) -> DateTime<Utc> {
        self.state_history
            .last()
            .map(|entry| entry.timestamp)
            .unwrap_or(self.created_at)
    }

    pub fn transition_count(&self) -> usize {
        self.state_history
            .iter()
            .filter(|entry| entry.is_transition())
            .count()
    }

    /// Checks the history/state/metrics invariants in one place.
    pub fn is_consistent(&self) -> bool {
        let state_matches = self
            .state_history
            .last()
            .map(|entry| entry.to_state == self.current_state)
            .unwrap_or(false);
        state_matches && self.metrics.total_transitions == self.transition_count() as u64
    }
}

/// Optional creation inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDraft {
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub routing_config: RoutingConfig,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Position of a workflow in a category's waitlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub workflow_id: WorkflowId,
    pub category: String,
    pub position: usize,
    pub waitlist_date: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Inclusive time range used by history and metrics queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            start: start.unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: end.unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None, None)
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}
