//! Enrollment review workflow engine: a guarded state machine over an injected rule
//! table, with reviewer routing, per-category waitlists, dwell metrics, and an
//! append-only history ledger.

pub mod batch;
pub mod clock;
pub mod domain;
pub mod history;
pub mod machine;
pub mod memory;
pub mod metrics;
pub mod repository;
pub mod router;
pub mod routing;
pub mod rules;
pub mod service;
pub mod waitlist;

#[cfg(test)]
mod tests;

pub use batch::{BatchCancellation, BatchCoordinator, BatchItemOutcome, BatchReport, BatchRequest};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    Actor, ActorRole, ApplicationId, ApplicationStatus, HistoryEntry, Metadata, Priority,
    RouteTarget, RoutingConfig, TimeWindow, WaitlistEntry, Workflow, WorkflowId, WorkflowState,
};
pub use history::{HistoryLedger, InMemoryHistoryLedger, LedgerError};
pub use machine::{StateMachine, TransitionError, TransitionGuard, TransitionRequest};
pub use memory::{InMemoryWorkflowStore, RecordingNotifier, StaticApplicationRegistry};
pub use metrics::{Bottleneck, MetricsAggregator, MetricsReport, PopulationMetrics};
pub use repository::{
    ApplicationRegistry, NotificationDispatcher, NotifyError, RegistryError, StoreError,
    WorkflowEvent, WorkflowEventKind, WorkflowFilter, WorkflowStore,
};
pub use router::workflow_router;
pub use routing::{RoutingEngine, SlaDefaults, SlaStatus};
pub use rules::{PredicateRegistry, RuleTableError, TransitionRule, TransitionRuleTable, Validator};
pub use service::{
    Assignment, Collaborators, CreateWorkflow, EngineSettings, StateUpdate, WaitlistAction,
    WaitlistCommand, WorkflowError, WorkflowService, WorkflowView,
};
pub use waitlist::{WaitlistError, WaitlistManager};
