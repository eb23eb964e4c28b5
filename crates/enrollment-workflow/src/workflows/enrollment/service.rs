//! Service composing the state machine, routing, waitlists, metrics, and the
//! storage/notification collaborators.
//!
//! Every mutation is a versioned read-modify-write against the store: load the
//! workflow and its version, mutate a private copy, then `put_with_version_check`.
//! A version mismatch surfaces as [`WorkflowError::Conflict`] and is never retried here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::domain::{
    Actor, ActorRole, ApplicationId, ApplicationStatus, HistoryEntry, Metadata, Priority,
    RoutingConfig, TimeWindow, WaitlistEntry, Workflow, WorkflowDraft, WorkflowId, WorkflowState,
};
use super::history::{HistoryLedger, InMemoryHistoryLedger, LedgerError};
use super::machine::{StateMachine, TransitionError, TransitionRequest};
use super::memory::{InMemoryWorkflowStore, RecordingNotifier, StaticApplicationRegistry};
use super::metrics::{MetricsAggregator, MetricsReport, PopulationMetrics};
use super::repository::{
    ApplicationRegistry, NotificationDispatcher, RegistryError, StoreError, WorkflowEvent,
    WorkflowEventKind, WorkflowFilter, WorkflowStore,
};
use super::routing::{RoutingEngine, SlaDefaults, SlaStatus};
use super::rules::RuleTableError;
use super::waitlist::{WaitlistError, WaitlistManager};

/// Metadata key naming the waitlist category when a workflow enters `WAITLISTED`.
pub const WAITLIST_CATEGORY_KEY: &str = "waitlistCategory";

/// Actor id recorded on transitions fired by routing auto-transition.
pub const AUTO_TRANSITION_ACTOR: &str = "auto-transition";

/// External collaborators the service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn WorkflowStore>,
    pub ledger: Arc<dyn HistoryLedger>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub registry: Arc<dyn ApplicationRegistry>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Process-local collaborators; every application id is accepted.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryWorkflowStore::new()),
            ledger: Arc::new(InMemoryHistoryLedger::new()),
            notifier: Arc::new(RecordingNotifier::new()),
            registry: Arc::new(StaticApplicationRegistry::allow_any()),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Tunables loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub bottleneck_threshold: Duration,
    pub max_batch_size: usize,
    pub sla_defaults: SlaDefaults,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bottleneck_threshold: Duration::hours(48),
            max_batch_size: 100,
            sla_defaults: SlaDefaults::standard(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateWorkflow {
    pub application_id: ApplicationId,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub routing_config: RoutingConfig,
    #[serde(default)]
    pub metadata: Metadata,
    /// Defaults to the system actor.
    #[serde(default)]
    pub created_by: Option<Actor>,
}

impl CreateWorkflow {
    pub fn for_application(application_id: impl Into<String>) -> Self {
        Self {
            application_id: ApplicationId(application_id.into()),
            priority: Priority::default(),
            routing_config: RoutingConfig::default(),
            metadata: Metadata::new(),
            created_by: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub new_state: WorkflowState,
    pub updated_by: Actor,
    #[serde(default)]
    pub transition_metadata: Metadata,
    /// Version the caller last observed; checked before the transition runs.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl StateUpdate {
    pub fn new(new_state: WorkflowState, updated_by: Actor, transition_metadata: Metadata) -> Self {
        Self {
            new_state,
            updated_by,
            transition_metadata,
            expected_version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub reviewer_id: String,
    pub role: ActorRole,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitlistAction {
    Add,
    Remove,
    UpdatePosition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitlistCommand {
    pub action: WaitlistAction,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub position: Option<usize>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Workflow plus the derived fields clients render from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowView {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub application_status: ApplicationStatus,
    pub allowed_transitions: Vec<WorkflowState>,
    pub terminal: bool,
    pub sla: SlaStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("workflow {id} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        id: WorkflowId,
        expected: u64,
        actual: u64,
    },
    #[error("workflow {0} not found")]
    NotFound(WorkflowId),
    #[error("application {0} does not exist")]
    UnknownApplication(ApplicationId),
    #[error("application {application_id} is already tracked by workflow {workflow_id}")]
    AlreadyTracked {
        application_id: ApplicationId,
        workflow_id: WorkflowId,
    },
    #[error("workflow {id} is archived in terminal state {state}")]
    Archived { id: WorkflowId, state: WorkflowState },
    #[error(transparent)]
    Waitlist(#[from] WaitlistError),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("batch worker failed: {0}")]
    Worker(String),
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict {
                id,
                expected,
                actual,
            } => Self::Conflict {
                id,
                expected,
                actual,
            },
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::ApplicationTracked {
                application_id,
                workflow_id,
            } => Self::AlreadyTracked {
                application_id,
                workflow_id,
            },
            other => Self::Store(other),
        }
    }
}

pub struct WorkflowService {
    machine: StateMachine,
    routing: RoutingEngine,
    waitlist: WaitlistManager,
    metrics: MetricsAggregator,
    collaborators: Collaborators,
    settings: EngineSettings,
    sequence: AtomicU64,
}

impl WorkflowService {
    pub fn new(
        machine: StateMachine,
        collaborators: Collaborators,
        settings: EngineSettings,
    ) -> Self {
        Self {
            machine,
            routing: RoutingEngine::new(settings.sla_defaults.clone()),
            waitlist: WaitlistManager::new(),
            metrics: MetricsAggregator,
            collaborators,
            settings,
            sequence: AtomicU64::new(1),
        }
    }

    /// Standard enrollment rule table with builtin predicates.
    pub fn standard(
        collaborators: Collaborators,
        settings: EngineSettings,
    ) -> Result<Self, RuleTableError> {
        Ok(Self::new(StateMachine::standard()?, collaborators, settings))
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn now(&self) -> DateTime<Utc> {
        self.collaborators.clock.now()
    }

    fn next_workflow_id(&self) -> WorkflowId {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        WorkflowId(format!("wf-{id:06}"))
    }

    pub fn create(&self, request: CreateWorkflow) -> Result<Workflow, WorkflowError> {
        let application_id = request.application_id;
        if application_id.0.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "application_id must not be blank".to_string(),
            ));
        }
        validate_routing(&request.routing_config)?;

        if !self
            .collaborators
            .registry
            .application_exists(&application_id)?
        {
            return Err(WorkflowError::UnknownApplication(application_id));
        }

        let existing = self.collaborators.store.list_by_filter(&WorkflowFilter {
            application_id: Some(application_id.clone()),
            ..WorkflowFilter::default()
        })?;
        if let Some(tracked) = existing.into_iter().next() {
            return Err(WorkflowError::AlreadyTracked {
                application_id,
                workflow_id: tracked.id,
            });
        }

        let now = self.now();
        let created_by = request.created_by.unwrap_or_else(Actor::system);
        let mut workflow = Workflow::open(
            self.next_workflow_id(),
            application_id,
            self.machine.rules().initial_state(),
            WorkflowDraft {
                priority: request.priority,
                routing_config: request.routing_config,
                metadata: request.metadata,
            },
            &created_by,
            now,
        );
        let assignment = self.routing.apply_routing_rule(&mut workflow, now);

        let stored = self.collaborators.store.insert(workflow)?;
        if let Some(creation) = stored.state_history.first() {
            self.audit(&stored.id, creation.clone());
        }

        info!(
            workflow_id = %stored.id,
            application_id = %stored.application_id,
            state = %stored.current_state,
            "workflow created"
        );
        self.notify(
            WorkflowEventKind::Created,
            &stored.id,
            json!({
                "application_id": stored.application_id,
                "state": stored.current_state,
                "priority": stored.priority,
            }),
        );
        if let Some(record) = assignment {
            self.notify(
                WorkflowEventKind::Assigned,
                &stored.id,
                json!({ "reviewer_id": record.reviewer_id, "role": record.role }),
            );
        }
        Ok(stored)
    }

    pub fn get(&self, id: &WorkflowId) -> Result<Workflow, WorkflowError> {
        let (workflow, _) = self.collaborators.store.get_by_id_with_version(id)?;
        Ok(workflow)
    }

    pub fn view(&self, id: &WorkflowId) -> Result<WorkflowView, WorkflowError> {
        let workflow = self.get(id)?;
        Ok(self.view_of(workflow))
    }

    pub fn view_of(&self, workflow: Workflow) -> WorkflowView {
        let state = workflow.current_state;
        WorkflowView {
            application_status: state.application_status(),
            allowed_transitions: self.machine.allowed_transitions(state),
            terminal: self.machine.is_terminal(state),
            sla: self.sla_of(&workflow, self.now()),
            workflow,
        }
    }

    /// Runs one transition through the guard pipeline and commits it.
    pub fn update_state(
        &self,
        id: &WorkflowId,
        update: StateUpdate,
    ) -> Result<Workflow, WorkflowError> {
        let request = TransitionRequest {
            target: update.new_state,
            actor: update.updated_by,
            metadata: update.transition_metadata,
        };
        self.commit_transition(id, request, update.expected_version)
    }

    fn commit_transition(
        &self,
        id: &WorkflowId,
        request: TransitionRequest,
        expected_version: Option<u64>,
    ) -> Result<Workflow, WorkflowError> {
        let (mut workflow, version) = self.load(id, expected_version)?;
        let now = self.now();
        let actor = request.actor.clone();

        let entry = match self.machine.transition(&mut workflow, request, now) {
            Ok(entry) => entry,
            Err(rejection) => {
                warn!(
                    workflow_id = %id,
                    kind = rejection.kind(),
                    actor_id = %actor.id,
                    actor_role = %actor.role,
                    "transition rejected: {rejection}"
                );
                return Err(rejection.into());
            }
        };
        let assignment = self.routing.apply_routing_rule(&mut workflow, now);

        let stored = match self
            .collaborators
            .store
            .put_with_version_check(workflow, version)
        {
            Ok(stored) => stored,
            Err(failure) => {
                warn!(workflow_id = %id, "transition not persisted: {failure}");
                return Err(failure.into());
            }
        };

        self.audit(&stored.id, entry.clone());
        info!(
            workflow_id = %stored.id,
            from = ?entry.from_state,
            to = %entry.to_state,
            actor_id = %entry.actor_id,
            version = stored.version,
            "workflow transitioned"
        );
        self.notify(
            WorkflowEventKind::Transitioned,
            &stored.id,
            json!({
                "from": entry.from_state,
                "to": entry.to_state,
                "actor_id": entry.actor_id,
                "actor_role": entry.actor_role,
                "application_status": entry.to_state.application_status(),
            }),
        );
        if let Some(record) = assignment {
            self.notify(
                WorkflowEventKind::Assigned,
                &stored.id,
                json!({ "reviewer_id": record.reviewer_id, "role": record.role }),
            );
        }
        self.sync_waitlist(&stored, &entry, now);
        Ok(stored)
    }

    pub fn history(
        &self,
        id: &WorkflowId,
        window: TimeWindow,
    ) -> Result<Vec<HistoryEntry>, WorkflowError> {
        validate_window(&window)?;
        self.get(id)?;
        Ok(self.collaborators.ledger.query(id, window)?)
    }

    pub fn assign(
        &self,
        id: &WorkflowId,
        assignment: Assignment,
    ) -> Result<Workflow, WorkflowError> {
        if assignment.reviewer_id.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "reviewer_id must not be blank".to_string(),
            ));
        }
        let (mut workflow, version) = self.load(id, assignment.expected_version)?;
        self.ensure_active(&workflow)?;

        let now = self.now();
        let record = self
            .routing
            .assign(&mut workflow, assignment.reviewer_id, assignment.role, now);
        let stored = self
            .collaborators
            .store
            .put_with_version_check(workflow, version)?;

        info!(workflow_id = %stored.id, reviewer_id = %record.reviewer_id, "workflow assigned");
        self.notify(
            WorkflowEventKind::Assigned,
            &stored.id,
            json!({ "reviewer_id": record.reviewer_id, "role": record.role }),
        );
        Ok(stored)
    }

    /// Replaces the routing config. With auto-transition enabled, the first outgoing
    /// edge already satisfied by the accumulated metadata is attempted once.
    pub fn configure_routing(
        &self,
        id: &WorkflowId,
        config: RoutingConfig,
        expected_version: Option<u64>,
    ) -> Result<Workflow, WorkflowError> {
        validate_routing(&config)?;
        let (mut workflow, version) = self.load(id, expected_version)?;
        self.ensure_active(&workflow)?;

        self.routing.configure(&mut workflow, config, self.now());
        let stored = self
            .collaborators
            .store
            .put_with_version_check(workflow, version)?;
        debug!(workflow_id = %stored.id, "routing configured");

        if !stored.routing_config.auto_transition_enabled {
            return Ok(stored);
        }
        let Some(rule) = self.machine.satisfied_rule(&stored) else {
            debug!(workflow_id = %stored.id, "auto-transition enabled but no edge is satisfied");
            return Ok(stored);
        };

        let request = TransitionRequest {
            target: rule.target,
            actor: Actor::new(AUTO_TRANSITION_ACTOR, rule.required_role),
            metadata: rule.payload_from(&stored.metadata),
        };
        match self.commit_transition(&stored.id, request, Some(stored.version)) {
            Ok(advanced) => {
                info!(
                    workflow_id = %advanced.id,
                    state = %advanced.current_state,
                    "auto-transition applied"
                );
                Ok(advanced)
            }
            Err(failure) => {
                warn!(workflow_id = %stored.id, "auto-transition skipped: {failure}");
                Ok(stored)
            }
        }
    }

    pub fn manage_waitlist(
        &self,
        id: &WorkflowId,
        command: WaitlistCommand,
    ) -> Result<WaitlistEntry, WorkflowError> {
        let workflow = self.get(id)?;
        let category = command.category.trim();

        match command.action {
            WaitlistAction::Add => {
                if category.is_empty() {
                    return Err(WorkflowError::Validation(
                        "category is required to add to a waitlist".to_string(),
                    ));
                }
                self.ensure_active(&workflow)?;
                let entry =
                    self.waitlist
                        .add_to_waitlist(id, category, command.metadata, self.now())?;
                // A terminal transition committed between the read above and the add
                // found no slot to release; undo the add ourselves.
                let current = self.get(id)?;
                if let Err(archived) = self.ensure_active(&current) {
                    self.release_waitlist_slot(id);
                    return Err(archived);
                }
                info!(workflow_id = %id, category, position = entry.position, "waitlisted");
                Ok(entry)
            }
            WaitlistAction::Remove => {
                self.ensure_category(id, category)?;
                let removed = self.waitlist.remove_position(id)?;
                info!(workflow_id = %id, category = %removed.category, "removed from waitlist");
                Ok(removed)
            }
            WaitlistAction::UpdatePosition => {
                let position = command.position.ok_or_else(|| {
                    WorkflowError::Validation(
                        "position is required for UPDATE_POSITION".to_string(),
                    )
                })?;
                self.ensure_category(id, category)?;
                Ok(self.waitlist.update_position(id, position)?)
            }
        }
    }

    pub fn waitlist(&self, category: &str) -> Vec<WaitlistEntry> {
        self.waitlist.entries(category)
    }

    pub fn metrics(
        &self,
        id: &WorkflowId,
        window: TimeWindow,
        threshold: Option<Duration>,
    ) -> Result<MetricsReport, WorkflowError> {
        validate_window(&window)?;
        let workflow = self.get(id)?;
        let history = self.collaborators.ledger.query(id, window)?;
        let now = self.now();
        let sla = self.sla_of(&workflow, now);
        Ok(self.metrics.report(
            &workflow,
            window,
            &history,
            sla,
            threshold.unwrap_or(self.settings.bottleneck_threshold),
            now,
        ))
    }

    /// Bottleneck analysis across every workflow matching `filter`.
    pub fn population_metrics(
        &self,
        filter: &WorkflowFilter,
        threshold: Option<Duration>,
    ) -> Result<PopulationMetrics, WorkflowError> {
        let workflows = self.collaborators.store.list_by_filter(filter)?;
        let now = self.now();
        let breached = workflows
            .iter()
            .filter(|workflow| self.sla_of(workflow, now).breached)
            .count();
        Ok(self.metrics.population(
            &workflows,
            breached,
            threshold.unwrap_or(self.settings.bottleneck_threshold),
        ))
    }

    fn load(
        &self,
        id: &WorkflowId,
        expected_version: Option<u64>,
    ) -> Result<(Workflow, u64), WorkflowError> {
        let (workflow, version) = self.collaborators.store.get_by_id_with_version(id)?;
        match expected_version {
            Some(expected) if expected != version => {
                warn!(workflow_id = %id, expected, actual = version, "stale workflow version");
                Err(WorkflowError::Conflict {
                    id: id.clone(),
                    expected,
                    actual: version,
                })
            }
            _ => Ok((workflow, version)),
        }
    }

    fn sla_of(&self, workflow: &Workflow, now: DateTime<Utc>) -> SlaStatus {
        if self.machine.is_terminal(workflow.current_state) {
            return self.routing.archived_status(workflow, now);
        }
        self.routing.sla_status(workflow, now)
    }

    fn ensure_active(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        if self.machine.is_terminal(workflow.current_state) {
            return Err(WorkflowError::Archived {
                id: workflow.id.clone(),
                state: workflow.current_state,
            });
        }
        Ok(())
    }

    fn ensure_category(&self, id: &WorkflowId, category: &str) -> Result<(), WorkflowError> {
        if category.is_empty() {
            return Ok(());
        }
        match self.waitlist.entry(id) {
            Some(entry) if entry.category != category => Err(WorkflowError::Validation(format!(
                "workflow {id} is waitlisted in '{}', not '{category}'",
                entry.category
            ))),
            _ => Ok(()),
        }
    }

    // Entering WAITLISTED with a category queues the workflow. Leaving WAITLISTED or
    // reaching a terminal state releases its slot so the category stays dense.
    fn sync_waitlist(&self, workflow: &Workflow, entry: &HistoryEntry, now: DateTime<Utc>) {
        if entry.to_state == WorkflowState::Waitlisted {
            let category = entry
                .metadata
                .get(WAITLIST_CATEGORY_KEY)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|category| !category.is_empty());
            let Some(category) = category else {
                return;
            };
            match self
                .waitlist
                .add_to_waitlist(&workflow.id, category, Metadata::new(), now)
            {
                Ok(added) => {
                    info!(workflow_id = %workflow.id, category, position = added.position, "waitlisted");
                }
                Err(failure) => {
                    debug!(workflow_id = %workflow.id, "waitlist unchanged: {failure}");
                }
            }
            return;
        }

        let left_waitlist = entry.from_state == Some(WorkflowState::Waitlisted);
        if left_waitlist || self.machine.is_terminal(entry.to_state) {
            self.release_waitlist_slot(&workflow.id);
        }
    }

    fn release_waitlist_slot(&self, id: &WorkflowId) {
        if self.waitlist.entry(id).is_none() {
            return;
        }
        if let Ok(removed) = self.waitlist.remove_position(id) {
            info!(workflow_id = %id, category = %removed.category, "released waitlist slot");
        }
    }

    fn audit(&self, id: &WorkflowId, entry: HistoryEntry) {
        if let Err(failure) = self.collaborators.ledger.append(id, entry) {
            error!(workflow_id = %id, "history ledger append failed after commit: {failure}");
        }
    }

    fn notify(&self, kind: WorkflowEventKind, id: &WorkflowId, payload: Value) {
        let event = WorkflowEvent {
            kind,
            workflow_id: id.clone(),
            payload,
            emitted_at: self.now(),
        };
        if let Err(failure) = self.collaborators.notifier.emit(event) {
            warn!(workflow_id = %id, event = kind.label(), "notification dropped: {failure}");
        }
    }
}

impl std::fmt::Debug for WorkflowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowService")
            .field("machine", &self.machine)
            .field("settings", &self.settings)
            .finish()
    }
}

fn validate_window(window: &TimeWindow) -> Result<(), WorkflowError> {
    if window.is_valid() {
        return Ok(());
    }
    Err(WorkflowError::Validation(format!(
        "start_date {} is after end_date {}",
        window.start, window.end
    )))
}

fn validate_routing(config: &RoutingConfig) -> Result<(), WorkflowError> {
    if config.sla_hours == Some(0) {
        return Err(WorkflowError::Validation(
            "sla_hours must be greater than zero".to_string(),
        ));
    }
    match config
        .assignments
        .iter()
        .find(|(_, target)| target.reviewer_id.trim().is_empty())
    {
        Some((state, _)) => Err(WorkflowError::Validation(format!(
            "routing assignment for {state} has a blank reviewer_id"
        ))),
        None => Ok(()),
    }
}
