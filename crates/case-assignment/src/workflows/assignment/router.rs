use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::domain::{CaseId, CenterId, MediatorId, PageRequest, PendingAssignmentId, RuleId, TaskId};
use super::error::AssignmentError;
use super::pending::PendingStatus;
use super::rules::{RuleDraft, RuleFilter, RulePatch, RuleStatus};
use super::service::{AssignmentService, ManualAssignment, StartAssignment};
use super::stats::StatsRange;
use super::task::{StrategyKind, TaskFilter, TaskRecord, TaskStatus};

type SharedService = State<Arc<AssignmentService>>;

/// HTTP surface for rules, tasks, manual placement, and statistics.
pub fn assignment_router(service: Arc<AssignmentService>) -> Router {
    Router::new()
        .route(
            "/api/v1/assignment/rules",
            get(list_rules_handler).post(create_rule_handler),
        )
        .route(
            "/api/v1/assignment/rules/:rule_id",
            get(get_rule_handler)
                .put(update_rule_handler)
                .delete(delete_rule_handler),
        )
        .route(
            "/api/v1/assignment/rules/:rule_id/status",
            put(rule_status_handler),
        )
        .route("/api/v1/assignment/rules/:rule_id/test", post(test_rule_handler))
        .route(
            "/api/v1/assignment/smart-assignment/start",
            post(start_handler),
        )
        .route(
            "/api/v1/assignment/smart-assignment/stop",
            post(stop_all_handler),
        )
        .route("/api/v1/assignment/tasks", get(list_tasks_handler))
        .route("/api/v1/assignment/tasks/:task_id", get(get_task_handler))
        .route("/api/v1/assignment/tasks/:task_id/pause", post(pause_handler))
        .route(
            "/api/v1/assignment/tasks/:task_id/resume",
            post(resume_handler),
        )
        .route(
            "/api/v1/assignment/tasks/:task_id/cancel",
            post(cancel_handler),
        )
        .route(
            "/api/v1/assignment/manual-assignment",
            post(manual_assign_handler),
        )
        .route(
            "/api/v1/assignment/reassignments",
            post(reassignment_handler),
        )
        .route(
            "/api/v1/assignment/pending-assignments",
            get(list_pending_handler),
        )
        .route(
            "/api/v1/assignment/pending-assignments/:request_id/approve",
            post(approve_handler),
        )
        .route(
            "/api/v1/assignment/mediation-centers",
            get(list_centers_handler),
        )
        .route("/api/v1/assignment/mediators", get(list_mediators_handler))
        .route(
            "/api/v1/assignment/mediators/:mediator_id/workload",
            get(workload_handler),
        )
        .route("/api/v1/assignment/stats", get(statistics_handler))
        .route("/api/v1/assignment/trend", get(trend_handler))
        .route("/api/v1/assignment/reconcile", post(reconcile_handler))
        .with_state(service)
}

/// HTTP status for an operation-level failure.
pub fn status_for(error: &AssignmentError) -> StatusCode {
    match error {
        AssignmentError::Validation(_) | AssignmentError::BatchSizeExceeded { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AssignmentError::InvalidTransition { .. }
        | AssignmentError::AlreadyReviewed { .. }
        | AssignmentError::RuleInUse { .. }
        | AssignmentError::Capacity(_) => StatusCode::CONFLICT,
        AssignmentError::NotFound { .. } => StatusCode::NOT_FOUND,
        AssignmentError::DataAccess(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(error: AssignmentError) -> Response {
    let payload = json!({
        "error": error.to_string(),
    });
    (status_for(&error), Json(payload)).into_response()
}

/// Error body for task operations, so callers can tell a failed run from a
/// case that could not be placed.
fn task_error_response(error: AssignmentError) -> Response {
    let payload = json!({
        "error": error.to_string(),
        "scope": "task",
    });
    (status_for(&error), Json(payload)).into_response()
}

fn respond<T: Serialize>(status: StatusCode, body: T) -> Response {
    (status, Json(body)).into_response()
}

/// Tag every failed entry of `value[list]` with `"scope": "case"`.
fn with_case_scope(mut value: Value, list: &str) -> Value {
    if let Some(items) = value.get_mut(list).and_then(Value::as_array_mut) {
        for item in items {
            if item.get("failure").is_some_and(|failure| !failure.is_null()) {
                item["scope"] = json!("case");
            }
        }
    }
    value
}

fn task_record_view(record: &TaskRecord) -> Value {
    with_case_scope(json!(record), "results")
}

fn page_request(page: Option<u32>, size: Option<u32>) -> PageRequest {
    let defaults = PageRequest::default();
    PageRequest {
        page: page.unwrap_or(defaults.page),
        size: size.unwrap_or(defaults.size),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RuleListQuery {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<RuleStatus>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TaskListQuery {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<TaskStatus>,
    #[serde(default)]
    strategy: Option<StrategyKind>,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PendingListQuery {
    #[serde(default)]
    status: Option<PendingStatus>,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct MediatorQuery {
    #[serde(default)]
    center_id: Option<CenterId>,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageQuery {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StatsQuery {
    #[serde(default)]
    from: Option<NaiveDate>,
    #[serde(default)]
    to: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TrendQuery {
    #[serde(default)]
    days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusChange {
    status: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RuleTestRequest {
    case_ids: Vec<CaseId>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReassignmentRequest {
    case_id: CaseId,
    mediator_id: MediatorId,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApprovalRequest {
    approved: bool,
    #[serde(default)]
    note: Option<String>,
}

pub(crate) async fn list_rules_handler(
    State(service): SharedService,
    Query(query): Query<RuleListQuery>,
) -> Response {
    let filter = RuleFilter {
        name: query.name,
        status: query.status,
        priority: query.priority,
    };
    match service.list_rules(&filter, page_request(query.page, query.size)) {
        Ok(page) => respond(StatusCode::OK, page),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn create_rule_handler(
    State(service): SharedService,
    Json(draft): Json<RuleDraft>,
) -> Response {
    match service.create_rule(draft) {
        Ok(rule) => respond(StatusCode::CREATED, rule),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn get_rule_handler(
    State(service): SharedService,
    Path(rule_id): Path<u64>,
) -> Response {
    match service.get_rule(RuleId(rule_id)) {
        Ok(rule) => respond(StatusCode::OK, rule),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn update_rule_handler(
    State(service): SharedService,
    Path(rule_id): Path<u64>,
    Json(patch): Json<RulePatch>,
) -> Response {
    match service.update_rule(RuleId(rule_id), patch) {
        Ok(rule) => respond(StatusCode::OK, rule),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn delete_rule_handler(
    State(service): SharedService,
    Path(rule_id): Path<u64>,
) -> Response {
    match service.delete_rule(RuleId(rule_id)) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn rule_status_handler(
    State(service): SharedService,
    Path(rule_id): Path<u64>,
    Json(change): Json<StatusChange>,
) -> Response {
    match service.set_rule_status(RuleId(rule_id), &change.status) {
        Ok(rule) => respond(StatusCode::OK, rule),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn test_rule_handler(
    State(service): SharedService,
    Path(rule_id): Path<u64>,
    Json(request): Json<RuleTestRequest>,
) -> Response {
    match service.test_rule(RuleId(rule_id), &request.case_ids) {
        Ok(report) => respond(StatusCode::OK, report),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn start_handler(
    State(service): SharedService,
    Json(request): Json<StartAssignment>,
) -> Response {
    match service.start_assignment(request) {
        Ok(started) => respond(StatusCode::ACCEPTED, started),
        Err(error) => task_error_response(error),
    }
}

pub(crate) async fn stop_all_handler(State(service): SharedService) -> Response {
    match service.stop_all() {
        Ok(cancelled) => respond(StatusCode::OK, json!({ "cancelled": cancelled })),
        Err(error) => task_error_response(error),
    }
}

pub(crate) async fn list_tasks_handler(
    State(service): SharedService,
    Query(query): Query<TaskListQuery>,
) -> Response {
    let filter = TaskFilter {
        name: query.name,
        status: query.status,
        strategy: query.strategy,
    };
    match service.list_tasks(&filter, page_request(query.page, query.size)) {
        Ok(page) => respond(StatusCode::OK, page),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn get_task_handler(
    State(service): SharedService,
    Path(task_id): Path<u64>,
) -> Response {
    match service.get_task(TaskId(task_id)) {
        Ok(record) => respond(StatusCode::OK, task_record_view(&record)),
        Err(error) => task_error_response(error),
    }
}

pub(crate) async fn pause_handler(
    State(service): SharedService,
    Path(task_id): Path<u64>,
) -> Response {
    match service.pause_task(TaskId(task_id)) {
        Ok(task) => respond(StatusCode::OK, task),
        Err(error) => task_error_response(error),
    }
}

pub(crate) async fn resume_handler(
    State(service): SharedService,
    Path(task_id): Path<u64>,
) -> Response {
    match service.resume_task(TaskId(task_id)) {
        Ok(task) => respond(StatusCode::ACCEPTED, task),
        Err(error) => task_error_response(error),
    }
}

pub(crate) async fn cancel_handler(
    State(service): SharedService,
    Path(task_id): Path<u64>,
) -> Response {
    match service.cancel_task(TaskId(task_id)) {
        Ok(task) => respond(StatusCode::OK, task),
        Err(error) => task_error_response(error),
    }
}

pub(crate) async fn manual_assign_handler(
    State(service): SharedService,
    Json(request): Json<ManualAssignment>,
) -> Response {
    match service.manual_assign(request) {
        Ok(report) => respond(StatusCode::OK, with_case_scope(json!(report), "outcomes")),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn reassignment_handler(
    State(service): SharedService,
    Json(request): Json<ReassignmentRequest>,
) -> Response {
    match service.request_reassignment(request.case_id, request.mediator_id, request.reason) {
        Ok(pending) => respond(StatusCode::CREATED, pending),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn list_pending_handler(
    State(service): SharedService,
    Query(query): Query<PendingListQuery>,
) -> Response {
    match service.list_pending(query.status, page_request(query.page, query.size)) {
        Ok(page) => respond(StatusCode::OK, page),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn approve_handler(
    State(service): SharedService,
    Path(request_id): Path<u64>,
    Json(approval): Json<ApprovalRequest>,
) -> Response {
    let id = PendingAssignmentId(request_id);
    match service.approve_pending_assignment(id, approval.approved, approval.note) {
        Ok(request) => respond(StatusCode::OK, request),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn list_centers_handler(
    State(service): SharedService,
    Query(query): Query<PageQuery>,
) -> Response {
    match service.list_centers(page_request(query.page, query.size)) {
        Ok(page) => respond(StatusCode::OK, page),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn list_mediators_handler(
    State(service): SharedService,
    Query(query): Query<MediatorQuery>,
) -> Response {
    match service.list_mediators(query.center_id, page_request(query.page, query.size)) {
        Ok(page) => respond(StatusCode::OK, page),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn workload_handler(
    State(service): SharedService,
    Path(mediator_id): Path<u64>,
) -> Response {
    match service.mediator_workload(MediatorId(mediator_id)) {
        Ok(workload) => respond(StatusCode::OK, workload),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn statistics_handler(
    State(service): SharedService,
    Query(query): Query<StatsQuery>,
) -> Response {
    let range = StatsRange {
        from: query.from,
        to: query.to,
    };
    match service.statistics(range) {
        Ok(statistics) => respond(StatusCode::OK, statistics),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn trend_handler(
    State(service): SharedService,
    Query(query): Query<TrendQuery>,
) -> Response {
    match service.trend(query.days.unwrap_or(7)) {
        Ok(trend) => respond(StatusCode::OK, trend),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn reconcile_handler(State(service): SharedService) -> Response {
    match service.reconcile() {
        Ok(refreshed) => respond(StatusCode::OK, json!({ "trackers": refreshed })),
        Err(error) => error_response(error),
    }
}
