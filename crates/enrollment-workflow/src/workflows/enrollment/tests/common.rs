use std::sync::Arc;

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::enrollment::clock::ManualClock;
use crate::workflows::enrollment::domain::{
    Actor, ActorRole, ApplicationId, HistoryEntry, Metadata, TimeWindow, Workflow, WorkflowId,
    WorkflowState,
};
use crate::workflows::enrollment::history::{HistoryLedger, InMemoryHistoryLedger, LedgerError};
use crate::workflows::enrollment::memory::{
    InMemoryWorkflowStore, RecordingNotifier, StaticApplicationRegistry,
};
use crate::workflows::enrollment::repository::{
    NotificationDispatcher, NotifyError, WorkflowEvent,
};
use crate::workflows::enrollment::service::{
    Collaborators, CreateWorkflow, EngineSettings, StateUpdate, WorkflowService,
};

pub(super) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, 9, 0, 0).unwrap()
}

pub(super) fn metadata(value: Value) -> Metadata {
    serde_json::from_value(value).expect("metadata object")
}

pub(super) fn verifier() -> Actor {
    Actor::new("dv-ana", ActorRole::DocumentVerifier)
}

pub(super) fn academic_reviewer() -> Actor {
    Actor::new("ar-kofi", ActorRole::AcademicReviewer)
}

pub(super) fn admissions_officer() -> Actor {
    Actor::new("ao-lee", ActorRole::AdmissionsOfficer)
}

pub(super) fn enrollment_officer() -> Actor {
    Actor::new("eo-sam", ActorRole::EnrollmentOfficer)
}

pub(super) fn admin() -> Actor {
    Actor::new("admin-root", ActorRole::Admin)
}

pub(super) fn verification_metadata() -> Metadata {
    metadata(serde_json::json!({
        "documentsVerified": true,
        "verificationNotes": "ok",
    }))
}

pub(super) fn academic_metadata() -> Metadata {
    metadata(serde_json::json!({
        "academicScore": 91,
        "academicReviewNotes": "strong transcript",
    }))
}

/// Service wired to inspectable in-memory collaborators and a manual clock.
pub(super) struct Harness {
    pub(super) service: Arc<WorkflowService>,
    pub(super) clock: Arc<ManualClock>,
    pub(super) store: Arc<InMemoryWorkflowStore>,
    pub(super) ledger: Arc<InMemoryHistoryLedger>,
    pub(super) notifier: Arc<RecordingNotifier>,
    pub(super) registry: Arc<StaticApplicationRegistry>,
}

impl Harness {
    pub(super) fn create(&self, application_id: &str) -> Workflow {
        self.registry
            .register(ApplicationId(application_id.to_string()));
        self.service
            .create(CreateWorkflow::for_application(application_id))
            .expect("workflow created")
    }

    pub(super) fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub(super) fn move_to(
        &self,
        id: &WorkflowId,
        state: WorkflowState,
        actor: Actor,
        payload: Metadata,
    ) -> Workflow {
        self.service
            .update_state(id, StateUpdate::new(state, actor, payload))
            .unwrap_or_else(|error| panic!("transition to {state} failed: {error}"))
    }

    /// Walks a fresh workflow to FINAL_REVIEW through the standard table.
    pub(super) fn to_final_review(&self, application_id: &str) -> Workflow {
        let workflow = self.create(application_id);
        self.advance(Duration::hours(1));
        self.move_to(
            &workflow.id,
            WorkflowState::DocumentVerification,
            verifier(),
            verification_metadata(),
        );
        self.advance(Duration::hours(1));
        self.move_to(
            &workflow.id,
            WorkflowState::AcademicReview,
            academic_reviewer(),
            metadata(serde_json::json!({ "transcriptsReceived": true })),
        );
        self.advance(Duration::hours(1));
        self.move_to(
            &workflow.id,
            WorkflowState::FinalReview,
            admissions_officer(),
            academic_metadata(),
        )
    }

    pub(super) fn events(&self) -> Vec<WorkflowEvent> {
        self.notifier.events()
    }
}

pub(super) fn harness() -> Harness {
    harness_with(EngineSettings::default())
}

pub(super) fn harness_with(settings: EngineSettings) -> Harness {
    let clock = Arc::new(ManualClock::new(base_time()));
    let store = Arc::new(InMemoryWorkflowStore::new());
    let ledger = Arc::new(InMemoryHistoryLedger::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let registry = Arc::new(StaticApplicationRegistry::new([ApplicationId(
        "A1".to_string(),
    )]));

    let collaborators = Collaborators {
        store: store.clone(),
        ledger: ledger.clone(),
        notifier: notifier.clone(),
        registry: registry.clone(),
        clock: clock.clone(),
    };
    let service =
        WorkflowService::standard(collaborators, settings).expect("standard table is valid");

    Harness {
        service: Arc::new(service),
        clock,
        store,
        ledger,
        notifier,
        registry,
    }
}

/// Service whose notifier and ledger always fail, to prove commits survive them.
pub(super) fn harness_with_broken_side_channels() -> (Arc<WorkflowService>, Arc<InMemoryWorkflowStore>) {
    let store = Arc::new(InMemoryWorkflowStore::new());
    let collaborators = Collaborators {
        store: store.clone(),
        ledger: Arc::new(UnavailableLedger),
        notifier: Arc::new(ClosedNotifier),
        registry: Arc::new(StaticApplicationRegistry::allow_any()),
        clock: Arc::new(ManualClock::new(base_time())),
    };
    let service = WorkflowService::standard(collaborators, EngineSettings::default())
        .expect("standard table is valid");
    (Arc::new(service), store)
}

pub(super) struct ClosedNotifier;

impl NotificationDispatcher for ClosedNotifier {
    fn emit(&self, _event: WorkflowEvent) -> Result<(), NotifyError> {
        Err(NotifyError::Closed)
    }
}

pub(super) struct UnavailableLedger;

impl HistoryLedger for UnavailableLedger {
    fn append(&self, _workflow_id: &WorkflowId, _entry: HistoryEntry) -> Result<(), LedgerError> {
        Err(LedgerError::Unavailable("disk full".to_string()))
    }

    fn query(
        &self,
        _workflow_id: &WorkflowId,
        _window: TimeWindow,
    ) -> Result<Vec<HistoryEntry>, LedgerError> {
        Err(LedgerError::Unavailable("disk full".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
