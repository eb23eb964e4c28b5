use chrono::Duration;
use serde_json::json;

use super::common::*;
use crate::workflows::enrollment::batch::{
    BatchCancellation, BatchCoordinator, BatchItemOutcome, BatchRequest,
};
use crate::workflows::enrollment::domain::{WorkflowId, WorkflowState};
use crate::workflows::enrollment::machine::TransitionError;
use crate::workflows::enrollment::service::{EngineSettings, WorkflowError};

fn verify_all(ids: Vec<WorkflowId>) -> BatchRequest {
    BatchRequest {
        workflow_ids: ids,
        new_state: WorkflowState::DocumentVerification,
        updated_by: verifier(),
        transition_metadata: verification_metadata(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_members_fail_alone() {
    let harness = harness();
    let mut ids = Vec::new();
    for n in 0..8 {
        ids.push(harness.create(&format!("A{n}")).id);
    }
    // Two members move past CREATED first, so the batch edge is unknown for them.
    for id in &ids[..2] {
        harness.move_to(
            id,
            WorkflowState::Cancelled,
            admin(),
            metadata(json!({ "cancellationReason": "withdrawn" })),
        );
    }
    harness.advance(Duration::hours(1));

    let report = BatchCoordinator::new(harness.service.clone())
        .batch_update(verify_all(ids.clone()), &BatchCancellation::new())
        .await
        .expect("batch runs");

    assert_eq!(report.outcomes.len(), 8);
    assert_eq!(report.successes(), 6);
    assert_eq!(report.failures(), 2);
    for id in &ids[..2] {
        assert!(matches!(
            report.outcome(id),
            Some(BatchItemOutcome::Failed(WorkflowError::Transition(
                TransitionError::TerminalStateViolation { .. }
            )))
        ));
    }
    for id in &ids[2..] {
        let stored = harness.service.get(id).expect("stored");
        assert_eq!(stored.current_state, WorkflowState::DocumentVerification);
        assert!(stored.is_consistent());
    }
    let order: Vec<_> = report.outcomes.iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(order, ids);
}

#[tokio::test]
async fn summary_lists_failures_with_messages() {
    let harness = harness();
    let known = harness.create("A1").id;
    let ghost = WorkflowId("wf-424242".to_string());

    let report = BatchCoordinator::new(harness.service.clone())
        .batch_update(
            verify_all(vec![known.clone(), ghost.clone()]),
            &BatchCancellation::new(),
        )
        .await
        .expect("batch runs");
    let summary = report.summary();

    assert_eq!(summary.results.get(&known), Some(&true));
    assert_eq!(summary.results.get(&ghost), Some(&false));
    assert_eq!(summary.failed_workflows, vec![ghost.clone()]);
    assert_eq!(summary.error_messages.len(), 1);
    assert!(summary.error_messages[0].starts_with("wf-424242: "));

    let wire = serde_json::to_value(&summary).expect("serialize");
    assert_eq!(wire["results"]["wf-424242"], json!(false));
}

#[tokio::test]
async fn malformed_batches_are_rejected_up_front() {
    let harness = harness_with(EngineSettings {
        max_batch_size: 2,
        ..EngineSettings::default()
    });
    let first = harness.create("A1").id;
    let second = harness.create("A2").id;
    let third = harness.create("A3").id;
    let coordinator = BatchCoordinator::new(harness.service.clone());
    let cancellation = BatchCancellation::new();

    for ids in [Vec::new(), vec![first.clone(), second, third]] {
        let outcome = coordinator
            .batch_update(verify_all(ids.clone()), &cancellation)
            .await;
        assert!(
            matches!(outcome, Err(WorkflowError::Validation(_))),
            "{ids:?}: {outcome:?}"
        );
    }
    assert_eq!(
        harness.service.get(&first).expect("stored").current_state,
        WorkflowState::Created
    );
}

#[tokio::test]
async fn repeated_ids_fail_alone_and_run_once() {
    let harness = harness();
    let first = harness.create("A1").id;
    let second = harness.create("A2").id;
    let third = harness.create("A3").id;
    let ids = vec![first.clone(), second.clone(), first.clone(), third.clone()];

    let report = BatchCoordinator::new(harness.service.clone())
        .batch_update(verify_all(ids.clone()), &BatchCancellation::new())
        .await
        .expect("batch runs");

    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.successes(), 3);
    assert_eq!(report.failures(), 1);
    assert!(matches!(
        report.outcomes[2],
        (ref id, BatchItemOutcome::Failed(WorkflowError::Validation(_))) if *id == first
    ));
    let stored = harness.service.get(&first).expect("stored");
    assert_eq!(stored.current_state, WorkflowState::DocumentVerification);
    assert_eq!(stored.metrics.total_transitions, 1);

    let summary = report.summary();
    assert_eq!(summary.results.get(&first), Some(&true));
    assert_eq!(summary.results.get(&third), Some(&true));
    assert_eq!(summary.failed_workflows, vec![first]);
    assert_eq!(summary.error_messages.len(), 1);
}

#[tokio::test]
async fn cancelled_batches_dispatch_nothing() {
    let harness = harness();
    let ids: Vec<_> = ["A1", "A2", "A3"]
        .into_iter()
        .map(|app| harness.create(app).id)
        .collect();
    let cancellation = BatchCancellation::new();
    cancellation.cancel();

    let report = BatchCoordinator::new(harness.service.clone())
        .batch_update(verify_all(ids.clone()), &cancellation)
        .await
        .expect("batch runs");

    assert_eq!(report.successes(), 0);
    assert!(report
        .outcomes
        .iter()
        .all(|(_, outcome)| matches!(outcome, BatchItemOutcome::Cancelled)));
    for id in &ids {
        assert_eq!(
            harness.service.get(id).expect("stored").current_state,
            WorkflowState::Created
        );
    }
    assert_eq!(report.summary().failed_workflows, ids);
}
