//! Guarded state machine applying single transitions against the injected rule table.
//!
//! A transition runs through an explicit pipeline: the edge is resolved (terminal and
//! unknown-edge checks), every [`TransitionGuard`] runs in order (role, required metadata,
//! validators, then any caller-supplied stages), and only then is the workflow mutated.
//! Persisting, ledger appends, and notifications happen in the service once the store
//! accepts the write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Actor, ActorRole, HistoryEntry, Metadata, Workflow, WorkflowId, WorkflowState,
};
use super::metrics::MetricsAggregator;
use super::rules::{PredicateRegistry, RuleTableError, TransitionRule, TransitionRuleTable};

/// Rejection reasons for a single transition. Each carries enough context to
/// reconstruct the attempt from an audit log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("workflow {workflow_id}: no transition from {from} to {to}")]
    UnknownTransition {
        workflow_id: WorkflowId,
        from: WorkflowState,
        to: WorkflowState,
    },
    #[error("workflow {workflow_id}: role {actual} may not move {from} -> {to} (requires {required})")]
    Unauthorized {
        workflow_id: WorkflowId,
        from: WorkflowState,
        to: WorkflowState,
        required: ActorRole,
        actual: ActorRole,
    },
    #[error("workflow {workflow_id}: {from} -> {to} requires metadata key '{key}'")]
    MissingMetadata {
        workflow_id: WorkflowId,
        from: WorkflowState,
        to: WorkflowState,
        key: String,
    },
    #[error("workflow {workflow_id}: {from} -> {to} failed validator #{index} ({rule})")]
    ValidatorFailed {
        workflow_id: WorkflowId,
        from: WorkflowState,
        to: WorkflowState,
        index: usize,
        rule: String,
    },
    #[error("workflow {workflow_id} is frozen in terminal state {state}; cannot move to {to}")]
    TerminalStateViolation {
        workflow_id: WorkflowId,
        state: WorkflowState,
        to: WorkflowState,
    },
}

impl TransitionError {
    pub fn kind(&self) -> &'static str {
        match self {
            TransitionError::UnknownTransition { .. } => "unknown_transition",
            TransitionError::Unauthorized { .. } => "unauthorized",
            TransitionError::MissingMetadata { .. } => "missing_metadata",
            TransitionError::ValidatorFailed { .. } => "validator_failed",
            TransitionError::TerminalStateViolation { .. } => "terminal_state_violation",
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        match self {
            TransitionError::UnknownTransition { workflow_id, .. }
            | TransitionError::Unauthorized { workflow_id, .. }
            | TransitionError::MissingMetadata { workflow_id, .. }
            | TransitionError::ValidatorFailed { workflow_id, .. }
            | TransitionError::TerminalStateViolation { workflow_id, .. } => workflow_id,
        }
    }
}

/// Requested move for one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub target: WorkflowState,
    pub actor: Actor,
    #[serde(default)]
    pub metadata: Metadata,
}

/// What a guard stage can inspect. The edge is already resolved.
#[derive(Debug)]
pub struct TransitionContext<'a> {
    pub workflow: &'a Workflow,
    pub rule: &'a TransitionRule,
    pub request: &'a TransitionRequest,
}

impl TransitionContext<'_> {
    fn from_state(&self) -> WorkflowState {
        self.workflow.current_state
    }
}

/// A stage in the transition pipeline. Stages run in registration order and the
/// first rejection wins.
pub trait TransitionGuard: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, context: &TransitionContext<'_>) -> Result<(), TransitionError>;
}

/// Actor role must match the role declared on the edge.
#[derive(Debug, Default)]
pub struct AuthorizeRole;

impl TransitionGuard for AuthorizeRole {
    fn name(&self) -> &'static str {
        "authorize_role"
    }

    fn check(&self, context: &TransitionContext<'_>) -> Result<(), TransitionError> {
        if context.request.actor.role == context.rule.required_role {
            return Ok(());
        }
        Err(TransitionError::Unauthorized {
            workflow_id: context.workflow.id.clone(),
            from: context.from_state(),
            to: context.rule.target,
            required: context.rule.required_role,
            actual: context.request.actor.role,
        })
    }
}

/// Every key declared on the edge must be present in the request payload.
#[derive(Debug, Default)]
pub struct RequireMetadata;

impl TransitionGuard for RequireMetadata {
    fn name(&self) -> &'static str {
        "require_metadata"
    }

    fn check(&self, context: &TransitionContext<'_>) -> Result<(), TransitionError> {
        match context.rule.first_missing_key(&context.request.metadata) {
            None => Ok(()),
            Some(key) => Err(TransitionError::MissingMetadata {
                workflow_id: context.workflow.id.clone(),
                from: context.from_state(),
                to: context.rule.target,
                key: key.to_string(),
            }),
        }
    }
}

/// Runs the edge's validators in declared order, stopping at the first failure.
#[derive(Debug)]
pub struct RunValidators {
    predicates: Arc<PredicateRegistry>,
}

impl RunValidators {
    pub fn new(predicates: Arc<PredicateRegistry>) -> Self {
        Self { predicates }
    }
}

impl TransitionGuard for RunValidators {
    fn name(&self) -> &'static str {
        "run_validators"
    }

    fn check(&self, context: &TransitionContext<'_>) -> Result<(), TransitionError> {
        match context
            .rule
            .first_failing_validator(&context.request.metadata, &self.predicates)
        {
            None => Ok(()),
            Some((index, validator)) => Err(TransitionError::ValidatorFailed {
                workflow_id: context.workflow.id.clone(),
                from: context.from_state(),
                to: context.rule.target,
                index,
                rule: validator.describe(),
            }),
        }
    }
}

/// Central authority for workflow state.
pub struct StateMachine {
    rules: Arc<TransitionRuleTable>,
    predicates: Arc<PredicateRegistry>,
    guards: Vec<Box<dyn TransitionGuard>>,
    metrics: MetricsAggregator,
}

impl StateMachine {
    /// Builds the default pipeline, rejecting tables that reference unknown predicates.
    pub fn new(
        rules: TransitionRuleTable,
        predicates: PredicateRegistry,
    ) -> Result<Self, RuleTableError> {
        rules.check_predicates(&predicates)?;
        let predicates = Arc::new(predicates);
        let guards: Vec<Box<dyn TransitionGuard>> = vec![
            Box::new(AuthorizeRole),
            Box::new(RequireMetadata),
            Box::new(RunValidators::new(predicates.clone())),
        ];

        Ok(Self {
            rules: Arc::new(rules),
            predicates,
            guards,
            metrics: MetricsAggregator,
        })
    }

    pub fn standard() -> Result<Self, RuleTableError> {
        Self::new(
            TransitionRuleTable::standard(),
            PredicateRegistry::with_builtins(),
        )
    }

    /// Appends a stage that runs after the built-in checks.
    pub fn with_guard(mut self, guard: impl TransitionGuard + 'static) -> Self {
        self.guards.push(Box::new(guard));
        self
    }

    pub fn rules(&self) -> &TransitionRuleTable {
        &self.rules
    }

    pub fn guard_names(&self) -> Vec<&'static str> {
        self.guards.iter().map(|guard| guard.name()).collect()
    }

    pub fn is_terminal(&self, state: WorkflowState) -> bool {
        self.rules.is_terminal(state)
    }

    pub fn allowed_transitions(&self, state: WorkflowState) -> Vec<WorkflowState> {
        self.rules.allowed_targets(state)
    }

    /// Validates `request` against the workflow and, if every stage passes, applies it.
    /// Returns the history record that was appended. The workflow is untouched on error.
    pub fn transition(
        &self,
        workflow: &mut Workflow,
        request: TransitionRequest,
        now: DateTime<Utc>,
    ) -> Result<HistoryEntry, TransitionError> {
        let rule = self.resolve(workflow, request.target)?;
        {
            let context = TransitionContext {
                workflow: &*workflow,
                rule,
                request: &request,
            };
            for guard in &self.guards {
                guard.check(&context)?;
            }
        }
        Ok(self.apply(workflow, request, now))
    }

    /// First outgoing edge (declared order) whose own slice of the accumulated
    /// metadata already satisfies it.
    pub fn satisfied_rule(&self, workflow: &Workflow) -> Option<&TransitionRule> {
        if self.is_terminal(workflow.current_state) {
            return None;
        }
        self.rules
            .edges_from(workflow.current_state)
            .iter()
            .find(|rule| {
                rule.is_satisfied_by(&rule.payload_from(&workflow.metadata), &self.predicates)
            })
    }

    fn resolve(
        &self,
        workflow: &Workflow,
        target: WorkflowState,
    ) -> Result<&TransitionRule, TransitionError> {
        let from = workflow.current_state;
        if self.rules.is_terminal(from) {
            return Err(TransitionError::TerminalStateViolation {
                workflow_id: workflow.id.clone(),
                state: from,
                to: target,
            });
        }
        self.rules
            .rule(from, target)
            .ok_or_else(|| TransitionError::UnknownTransition {
                workflow_id: workflow.id.clone(),
                from,
                to: target,
            })
    }

    fn apply(
        &self,
        workflow: &mut Workflow,
        request: TransitionRequest,
        now: DateTime<Utc>,
    ) -> HistoryEntry {
        let exited = workflow.current_state;
        let dwell = now.signed_duration_since(workflow.entered_current_state_at());

        let entry = HistoryEntry {
            from_state: Some(exited),
            to_state: request.target,
            actor_id: request.actor.id,
            actor_role: request.actor.role,
            metadata: request.metadata.clone(),
            timestamp: now,
        };

        workflow.state_history.push(entry.clone());
        workflow.current_state = request.target;
        workflow.metadata.extend(request.metadata);
        workflow.updated_at = now;
        self.metrics.on_transition(&mut workflow.metrics, exited, dwell);

        entry
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("initial_state", &self.rules.initial_state())
            .field("guards", &self.guard_names())
            .finish()
    }
}
