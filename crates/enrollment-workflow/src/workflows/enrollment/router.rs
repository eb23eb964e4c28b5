use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use super::batch::{BatchCancellation, BatchCoordinator, BatchRequest};
use super::domain::{RoutingConfig, TimeWindow, WorkflowId, WorkflowState};
use super::machine::TransitionError;
use super::repository::{StoreError, WorkflowFilter};
use super::service::{
    Assignment, CreateWorkflow, StateUpdate, WaitlistCommand, WorkflowError, WorkflowService,
};
use super::waitlist::WaitlistError;

/// Router builder exposing the workflow engine over HTTP.
pub fn workflow_router(service: Arc<WorkflowService>) -> Router {
    Router::new()
        .route("/api/v1/workflows", post(create_handler))
        .route("/api/v1/workflows/:workflow_id", get(view_handler))
        .route(
            "/api/v1/workflows/:workflow_id/transitions",
            post(transition_handler),
        )
        .route("/api/v1/workflows/:workflow_id/history", get(history_handler))
        .route(
            "/api/v1/workflows/:workflow_id/routing",
            put(routing_handler),
        )
        .route(
            "/api/v1/workflows/:workflow_id/assignment",
            post(assignment_handler),
        )
        .route(
            "/api/v1/workflows/:workflow_id/waitlist",
            post(waitlist_handler),
        )
        .route("/api/v1/workflows/:workflow_id/metrics", get(metrics_handler))
        .route("/api/v1/waitlists/:category", get(waitlist_listing_handler))
        .route("/api/v1/metrics/bottlenecks", get(bottlenecks_handler))
        .route("/api/v1/batch/transitions", post(batch_handler))
        .with_state(service)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WindowQuery {
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    threshold_hours: Option<u32>,
}

impl WindowQuery {
    fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start_date, self.end_date)
    }

    fn threshold(&self) -> Option<Duration> {
        self.threshold_hours
            .map(|hours| Duration::hours(i64::from(hours)))
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PopulationQuery {
    state: Option<WorkflowState>,
    threshold_hours: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RoutingRequest {
    routing_config: RoutingConfig,
    #[serde(default)]
    expected_version: Option<u64>,
}

pub(crate) async fn create_handler(
    State(service): State<Arc<WorkflowService>>,
    axum::Json(request): axum::Json<CreateWorkflow>,
) -> Response {
    match service.create(request) {
        Ok(workflow) => {
            let view = service.view_of(workflow);
            (StatusCode::CREATED, axum::Json(view)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn view_handler(
    State(service): State<Arc<WorkflowService>>,
    Path(workflow_id): Path<String>,
) -> Response {
    match service.view(&WorkflowId(workflow_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn transition_handler(
    State(service): State<Arc<WorkflowService>>,
    Path(workflow_id): Path<String>,
    axum::Json(update): axum::Json<StateUpdate>,
) -> Response {
    match service.update_state(&WorkflowId(workflow_id), update) {
        Ok(workflow) => (StatusCode::OK, axum::Json(service.view_of(workflow))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn history_handler(
    State(service): State<Arc<WorkflowService>>,
    Path(workflow_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> Response {
    match service.history(&WorkflowId(workflow_id), query.window()) {
        Ok(entries) => (StatusCode::OK, axum::Json(entries)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn routing_handler(
    State(service): State<Arc<WorkflowService>>,
    Path(workflow_id): Path<String>,
    axum::Json(request): axum::Json<RoutingRequest>,
) -> Response {
    match service.configure_routing(
        &WorkflowId(workflow_id),
        request.routing_config,
        request.expected_version,
    ) {
        Ok(workflow) => (StatusCode::OK, axum::Json(service.view_of(workflow))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn assignment_handler(
    State(service): State<Arc<WorkflowService>>,
    Path(workflow_id): Path<String>,
    axum::Json(assignment): axum::Json<Assignment>,
) -> Response {
    match service.assign(&WorkflowId(workflow_id), assignment) {
        Ok(workflow) => (StatusCode::OK, axum::Json(service.view_of(workflow))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn waitlist_handler(
    State(service): State<Arc<WorkflowService>>,
    Path(workflow_id): Path<String>,
    axum::Json(command): axum::Json<WaitlistCommand>,
) -> Response {
    match service.manage_waitlist(&WorkflowId(workflow_id), command) {
        Ok(entry) => (StatusCode::OK, axum::Json(entry)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn metrics_handler(
    State(service): State<Arc<WorkflowService>>,
    Path(workflow_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> Response {
    match service.metrics(&WorkflowId(workflow_id), query.window(), query.threshold()) {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn waitlist_listing_handler(
    State(service): State<Arc<WorkflowService>>,
    Path(category): Path<String>,
) -> Response {
    let entries = service.waitlist(&category);
    (
        StatusCode::OK,
        axum::Json(json!({ "category": category, "entries": entries })),
    )
        .into_response()
}

pub(crate) async fn bottlenecks_handler(
    State(service): State<Arc<WorkflowService>>,
    Query(query): Query<PopulationQuery>,
) -> Response {
    let filter = WorkflowFilter {
        state: query.state,
        ..WorkflowFilter::default()
    };
    let threshold = query
        .threshold_hours
        .map(|hours| Duration::hours(i64::from(hours)));
    match service.population_metrics(&filter, threshold) {
        Ok(population) => (StatusCode::OK, axum::Json(population)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn batch_handler(
    State(service): State<Arc<WorkflowService>>,
    axum::Json(request): axum::Json<BatchRequest>,
) -> Response {
    let coordinator = BatchCoordinator::new(service);
    match coordinator
        .batch_update(request, &BatchCancellation::new())
        .await
    {
        Ok(report) => (StatusCode::OK, axum::Json(report.summary())).into_response(),
        Err(error) => error_response(error),
    }
}

/// HTTP status for each engine error.
pub fn status_for(error: &WorkflowError) -> StatusCode {
    match error {
        WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
        WorkflowError::Transition(TransitionError::Unauthorized { .. }) => StatusCode::FORBIDDEN,
        WorkflowError::Transition(_) => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::Conflict { .. }
        | WorkflowError::AlreadyTracked { .. }
        | WorkflowError::Archived { .. }
        | WorkflowError::Store(StoreError::Duplicate(_))
        | WorkflowError::Waitlist(WaitlistError::AlreadyWaitlisted { .. }) => StatusCode::CONFLICT,
        WorkflowError::NotFound(_)
        | WorkflowError::UnknownApplication(_)
        | WorkflowError::Waitlist(WaitlistError::NotWaitlisted(_)) => StatusCode::NOT_FOUND,
        WorkflowError::Waitlist(WaitlistError::InvalidPosition { .. }) => StatusCode::BAD_REQUEST,
        WorkflowError::Store(_)
        | WorkflowError::Ledger(_)
        | WorkflowError::Registry(_)
        | WorkflowError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: WorkflowError) -> Response {
    let status = status_for(&error);
    let mut payload = json!({ "error": error.to_string() });
    if let WorkflowError::Transition(rejection) = &error {
        payload["kind"] = json!(rejection.kind());
        payload["workflow_id"] = json!(rejection.workflow_id());
    }
    (status, axum::Json(payload)).into_response()
}
