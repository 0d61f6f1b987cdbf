//! JSON-over-HTTP binding for `MatchingService`, gated behind the `http`
//! feature. Exists so a worker under test can drive the engine from a
//! separate process without linking `matching-engine` directly; it is not a
//! compatibility surface for any external wire protocol.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};

use crate::error::MatchingServiceError;
use crate::service::MatchingService;
use crate::types::*;

#[derive(Clone)]
struct AppState {
    service: Arc<dyn MatchingService>,
}

impl IntoResponse for MatchingServiceError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            MatchingServiceError::Conflict { .. } => StatusCode::CONFLICT,
            MatchingServiceError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            MatchingServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
            MatchingServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Builds the router. Route names mirror the RPC names in spec §6 rather
/// than a REST resource hierarchy, since this is a direct RPC-call binding.
pub fn router(service: Arc<dyn MatchingService>) -> Router {
    let state = AppState { service };
    Router::new()
        .route("/AddActivityTask", post(add_activity_task))
        .route("/AddDecisionTask", post(add_decision_task))
        .route("/PollForActivityTask", post(poll_for_activity_task))
        .route("/PollForDecisionTask", post(poll_for_decision_task))
        .route("/QueryWorkflow", post(query_workflow))
        .route("/RespondQueryTaskCompleted", post(respond_query_task_completed))
        .route("/CancelOutstandingPoll", post(cancel_outstanding_poll))
        .route("/DescribeTaskList", post(describe_task_list))
        .route("/ListTaskListPartitions", post(list_task_list_partitions))
        .with_state(state)
}

async fn add_activity_task(
    State(state): State<AppState>,
    Json(request): Json<AddTaskRequest>,
) -> Result<StatusCode, MatchingServiceError> {
    state.service.add_activity_task(request).await?;
    Ok(StatusCode::OK)
}

async fn add_decision_task(
    State(state): State<AppState>,
    Json(request): Json<AddTaskRequest>,
) -> Result<StatusCode, MatchingServiceError> {
    state.service.add_decision_task(request).await?;
    Ok(StatusCode::OK)
}

async fn poll_for_activity_task(
    State(state): State<AppState>,
    Json(request): Json<PollRequest>,
) -> Result<Json<PolledTaskResponse>, MatchingServiceError> {
    Ok(Json(state.service.poll_for_activity_task(request).await?))
}

async fn poll_for_decision_task(
    State(state): State<AppState>,
    Json(request): Json<PollRequest>,
) -> Result<Json<PolledTaskResponse>, MatchingServiceError> {
    Ok(Json(state.service.poll_for_decision_task(request).await?))
}

async fn query_workflow(
    State(state): State<AppState>,
    Json(request): Json<QueryWorkflowRequest>,
) -> Result<Json<matching_types::QueryCompletion>, MatchingServiceError> {
    Ok(Json(state.service.query_workflow(request).await?))
}

async fn respond_query_task_completed(
    State(state): State<AppState>,
    Json(request): Json<RespondQueryTaskCompletedRequest>,
) -> Result<StatusCode, MatchingServiceError> {
    state.service.respond_query_task_completed(request).await?;
    Ok(StatusCode::OK)
}

async fn cancel_outstanding_poll(
    State(state): State<AppState>,
    Json(request): Json<CancelOutstandingPollRequest>,
) -> Result<StatusCode, MatchingServiceError> {
    state.service.cancel_outstanding_poll(request).await?;
    Ok(StatusCode::OK)
}

async fn describe_task_list(
    State(state): State<AppState>,
    Json(request): Json<DescribeTaskListRequest>,
) -> Result<Json<DescribeTaskListResponse>, MatchingServiceError> {
    Ok(Json(state.service.describe_task_list(request).await?))
}

async fn list_task_list_partitions(
    State(state): State<AppState>,
    Json(request): Json<ListTaskListPartitionsRequest>,
) -> Result<Json<ListTaskListPartitionsResponse>, MatchingServiceError> {
    Ok(Json(state.service.list_task_list_partitions(request).await?))
}
