use super::common::*;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::workflows::enrollment::domain::WorkflowState;
use crate::workflows::enrollment::router::{
    status_for, transition_handler, view_handler, workflow_router,
};
use crate::workflows::enrollment::service::{StateUpdate, WorkflowError};

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn create_route_returns_created_view() {
    let harness = harness();
    let router = workflow_router(harness.service.clone());

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/workflows",
            json!({ "application_id": "A1", "priority": "HIGH" }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["id"], json!("wf-000001"));
    assert_eq!(payload["current_state"], json!("CREATED"));
    assert_eq!(payload["terminal"], json!(false));
    assert_eq!(
        payload["allowed_transitions"],
        json!(["DOCUMENT_VERIFICATION", "CANCELLED"])
    );
}

#[tokio::test]
async fn transition_handler_reports_missing_metadata_as_unprocessable() {
    let harness = harness();
    let created = harness.create("A1");

    let response = transition_handler(
        State(harness.service.clone()),
        Path(created.id.0.clone()),
        axum::Json(StateUpdate::new(
            WorkflowState::DocumentVerification,
            verifier(),
            metadata(json!({ "documentsVerified": true })),
        )),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["kind"], json!("missing_metadata"));
    assert_eq!(payload["workflow_id"], json!(created.id.0));
}

#[tokio::test]
async fn transition_route_forbids_the_wrong_role() {
    let harness = harness();
    let created = harness.create("A1");
    let router = workflow_router(harness.service.clone());

    let response = router
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/workflows/{}/transitions", created.id),
            json!({
                "new_state": "DOCUMENT_VERIFICATION",
                "updated_by": { "id": "ar-kofi", "role": "ACADEMIC_REVIEWER" },
                "transition_metadata": { "documentsVerified": true, "verificationNotes": "ok" },
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let payload = read_json_body(response).await;
    assert_eq!(payload["kind"], json!("unauthorized"));
}

#[tokio::test]
async fn view_handler_returns_not_found_for_unknown_ids() {
    let harness = harness();

    let response = view_handler(
        State(harness.service.clone()),
        Path("wf-000404".to_string()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let payload = read_json_body(response).await;
    assert!(payload["error"].as_str().is_some());
}

#[tokio::test]
async fn history_route_honours_the_window_query() {
    let harness = harness();
    let workflow = harness.to_final_review("A1");
    let router = workflow_router(harness.service.clone());

    let response = router
        .oneshot(get_request(&format!(
            "/api/v1/workflows/{}/history?start_date=2025-09-01T09:30:00Z&end_date=2025-09-01T11:00:00Z",
            workflow.id
        )))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    let states: Vec<_> = payload
        .as_array()
        .expect("array")
        .iter()
        .map(|entry| entry["to_state"].clone())
        .collect();
    assert_eq!(
        states,
        vec![json!("DOCUMENT_VERIFICATION"), json!("ACADEMIC_REVIEW")]
    );
}

#[tokio::test]
async fn waitlist_routes_add_and_list_entries() {
    let harness = harness();
    let workflow = harness.to_final_review("A1");
    let router = workflow_router(harness.service.clone());

    let added = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/workflows/{}/waitlist", workflow.id),
            json!({ "action": "ADD", "category": "intl" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(added.status(), StatusCode::OK);

    let duplicate = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/workflows/{}/waitlist", workflow.id),
            json!({ "action": "ADD", "category": "domestic" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let listing = router
        .oneshot(get_request("/api/v1/waitlists/intl"))
        .await
        .expect("route executes");
    let payload = read_json_body(listing).await;
    assert_eq!(payload["category"], json!("intl"));
    assert_eq!(payload["entries"][0]["position"], json!(1));
    assert_eq!(payload["entries"][0]["workflow_id"], json!(workflow.id.0));
}

#[tokio::test]
async fn bottleneck_route_applies_threshold_hours() {
    let harness = harness();
    let created = harness.create("A1");
    harness.advance(chrono::Duration::hours(5));
    harness.move_to(
        &created.id,
        WorkflowState::DocumentVerification,
        verifier(),
        verification_metadata(),
    );
    let router = workflow_router(harness.service.clone());

    let response = router
        .oneshot(get_request("/api/v1/metrics/bottlenecks?threshold_hours=4"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["threshold_seconds"], json!(4 * 3_600));
    assert_eq!(payload["bottlenecks"][0]["state"], json!("CREATED"));
    assert_eq!(payload["bottlenecks"][0]["total_seconds"], json!(5 * 3_600));
}

#[tokio::test]
async fn batch_route_returns_per_workflow_summary() {
    let harness = harness();
    let created = harness.create("A1");
    let router = workflow_router(harness.service.clone());

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/batch/transitions",
            json!({
                "workflow_ids": [created.id.0, "wf-000777"],
                "new_state": "DOCUMENT_VERIFICATION",
                "updated_by": { "id": "dv-ana", "role": "DOCUMENT_VERIFIER" },
                "transition_metadata": { "documentsVerified": true, "verificationNotes": "ok" },
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["results"]["wf-000001"], json!(true));
    assert_eq!(payload["results"]["wf-000777"], json!(false));
    assert_eq!(payload["failed_workflows"], json!(["wf-000777"]));
}

#[test]
fn collaborator_failures_map_to_server_errors() {
    assert_eq!(
        status_for(&WorkflowError::Worker("panicked".to_string())),
        StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(
        status_for(&WorkflowError::Validation("bad".to_string())),
        StatusCode::BAD_REQUEST
    );
}
