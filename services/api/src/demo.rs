use chrono::{DateTime, Duration, Utc};
use clap::Args;
use enrollment_workflow::error::AppError;
use enrollment_workflow::workflows::enrollment::{
    Actor, ActorRole, ApplicationId, ApplicationStatus, BatchCancellation, BatchCoordinator,
    BatchRequest, Collaborators, CreateWorkflow, EngineSettings, InMemoryHistoryLedger,
    InMemoryWorkflowStore, ManualClock, Metadata, PopulationMetrics, Priority, RecordingNotifier,
    StateUpdate, StaticApplicationRegistry, WaitlistEntry, WorkflowFilter, WorkflowId,
    WorkflowService, WorkflowState,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

const DEMO_CATEGORY: &str = "general-admission";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Number of synthetic applications to enroll
    #[arg(long, default_value_t = 8)]
    pub(crate) applications: usize,
    /// Simulated start time (RFC 3339). Defaults to now.
    #[arg(long)]
    pub(crate) start: Option<DateTime<Utc>>,
    /// Print the outcome as JSON instead of a text report
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct DemoOutcome {
    pub(crate) workflows: Vec<DemoRow>,
    pub(crate) batch_failures: Vec<WorkflowId>,
    pub(crate) waitlist: Vec<WaitlistEntry>,
    pub(crate) population: PopulationMetrics,
    pub(crate) events: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct DemoRow {
    pub(crate) workflow_id: WorkflowId,
    pub(crate) application_id: ApplicationId,
    pub(crate) state: WorkflowState,
    pub(crate) application_status: ApplicationStatus,
    pub(crate) transitions: u64,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let start = args.start.unwrap_or_else(Utc::now);
    let outcome = simulate(args.applications.max(1), start).await?;

    if args.json {
        let rendered = serde_json::to_string_pretty(&outcome).map_err(std::io::Error::from)?;
        println!("{rendered}");
    } else {
        render(&outcome);
    }
    Ok(())
}

pub(crate) async fn simulate(
    applications: usize,
    start: DateTime<Utc>,
) -> Result<DemoOutcome, AppError> {
    let clock = Arc::new(ManualClock::new(start));
    let notifier = Arc::new(RecordingNotifier::new());
    let collaborators = Collaborators {
        store: Arc::new(InMemoryWorkflowStore::new()),
        ledger: Arc::new(InMemoryHistoryLedger::new()),
        notifier: notifier.clone(),
        registry: Arc::new(StaticApplicationRegistry::allow_any()),
        clock: clock.clone(),
    };
    let service = Arc::new(WorkflowService::standard(
        collaborators,
        EngineSettings::default(),
    )?);

    let mut ids = Vec::with_capacity(applications);
    for n in 0..applications {
        let mut request = CreateWorkflow::for_application(format!("APP-{:03}", n + 1));
        request.priority = match n % 3 {
            0 => Priority::High,
            1 => Priority::Normal,
            _ => Priority::Low,
        };
        ids.push(service.create(request)?.id);
    }

    clock.advance(Duration::hours(6));
    let report = BatchCoordinator::new(service.clone())
        .batch_update(
            BatchRequest {
                workflow_ids: ids.clone(),
                new_state: WorkflowState::DocumentVerification,
                updated_by: Actor::new("dv-demo", ActorRole::DocumentVerifier),
                transition_metadata: fields([
                    ("documentsVerified", json!(true)),
                    ("verificationNotes", json!("transcripts and identity checked")),
                ]),
            },
            &BatchCancellation::new(),
        )
        .await?;
    let batch_failures = report.summary().failed_workflows;

    for (index, id) in ids.iter().enumerate() {
        if batch_failures.contains(id) {
            continue;
        }
        clock.advance(Duration::hours(5));
        match index % 4 {
            0 => admit(&service, &clock, id)?,
            1 => {
                review(&service, &clock, id, 78)?;
                step(
                    &service,
                    id,
                    WorkflowState::Waitlisted,
                    officer(),
                    fields([("waitlistCategory", json!(DEMO_CATEGORY))]),
                )?;
            }
            2 => {
                step(
                    &service,
                    id,
                    WorkflowState::AcademicReview,
                    reviewer(),
                    fields([("transcriptsReceived", json!(true))]),
                )?;
                clock.advance(Duration::hours(30));
                step(
                    &service,
                    id,
                    WorkflowState::Rejected,
                    reviewer(),
                    fields([("rejectionReason", json!("prerequisites not met"))]),
                )?;
            }
            // Left in document verification so it ages past its SLA.
            _ => {}
        }
    }

    clock.advance(Duration::hours(60));
    let population = service.population_metrics(&WorkflowFilter::default(), None)?;
    let mut rows = Vec::with_capacity(ids.len());
    for id in &ids {
        let workflow = service.get(id)?;
        rows.push(DemoRow {
            workflow_id: workflow.id,
            application_id: workflow.application_id,
            state: workflow.current_state,
            application_status: workflow.current_state.application_status(),
            transitions: workflow.metrics.total_transitions,
        });
    }

    Ok(DemoOutcome {
        workflows: rows,
        batch_failures,
        waitlist: service.waitlist(DEMO_CATEGORY),
        population,
        events: notifier.events().len(),
    })
}

fn admit(service: &WorkflowService, clock: &ManualClock, id: &WorkflowId) -> Result<(), AppError> {
    review(service, clock, id, 91)?;
    clock.advance(Duration::hours(8));
    step(
        service,
        id,
        WorkflowState::Approved,
        officer(),
        fields([("decisionNotes", json!("admit for the autumn intake"))]),
    )?;
    clock.advance(Duration::days(3));
    step(
        service,
        id,
        WorkflowState::EnrollmentConfirmed,
        registrar(),
        fields([("depositReceived", json!(true))]),
    )?;
    clock.advance(Duration::days(1));
    step(
        service,
        id,
        WorkflowState::Completed,
        registrar(),
        Metadata::new(),
    )
}

fn review(
    service: &WorkflowService,
    clock: &ManualClock,
    id: &WorkflowId,
    score: u32,
) -> Result<(), AppError> {
    step(
        service,
        id,
        WorkflowState::AcademicReview,
        reviewer(),
        fields([("transcriptsReceived", json!(true))]),
    )?;
    clock.advance(Duration::hours(20));
    step(
        service,
        id,
        WorkflowState::FinalReview,
        officer(),
        fields([
            ("academicScore", json!(score)),
            ("academicReviewNotes", json!("meets programme requirements")),
        ]),
    )
}

fn step(
    service: &WorkflowService,
    id: &WorkflowId,
    state: WorkflowState,
    actor: Actor,
    metadata: Metadata,
) -> Result<(), AppError> {
    service.update_state(id, StateUpdate::new(state, actor, metadata))?;
    Ok(())
}

fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Metadata {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn reviewer() -> Actor {
    Actor::new("ar-demo", ActorRole::AcademicReviewer)
}

fn officer() -> Actor {
    Actor::new("ao-demo", ActorRole::AdmissionsOfficer)
}

fn registrar() -> Actor {
    Actor::new("eo-demo", ActorRole::EnrollmentOfficer)
}

fn render(outcome: &DemoOutcome) {
    println!("Enrollment workflow demo");
    println!("\nWorkflows");
    for row in &outcome.workflows {
        println!(
            "- {} ({}): {} [{:?}] after {} transition(s)",
            row.workflow_id, row.application_id, row.state, row.application_status, row.transitions
        );
    }
    if !outcome.batch_failures.is_empty() {
        println!("\nBatch verification failures: {:?}", outcome.batch_failures);
    }

    println!("\nWaitlist '{DEMO_CATEGORY}'");
    if outcome.waitlist.is_empty() {
        println!("- empty");
    }
    for entry in &outcome.waitlist {
        println!("- #{} {}", entry.position, entry.workflow_id);
    }

    let population = &outcome.population;
    println!(
        "\nPopulation: {} workflow(s), {} transition(s), {} SLA breach(es)",
        population.workflows, population.total_transitions, population.sla_breaches
    );
    if population.bottlenecks.is_empty() {
        println!(
            "- no state exceeds {}h of cumulative dwell",
            population.threshold_seconds / 3_600
        );
    }
    for bottleneck in &population.bottlenecks {
        println!(
            "- {}: {}h total across {} workflow(s), {}h average",
            bottleneck.state,
            bottleneck.total_seconds / 3_600,
            bottleneck.workflows,
            bottleneck.average_seconds / 3_600
        );
    }
    println!("\n{} workflow event(s) emitted", outcome.events);
}
