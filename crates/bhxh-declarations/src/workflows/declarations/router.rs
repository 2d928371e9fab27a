use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{DeclarationId, ParticipantId, PaymentId, UserId};
use super::events::EventBus;
use super::repository::{DeclarationStore, ParticipantFilter, RepositoryError};
use super::service::{DeclarationWorkflowError, SubmissionReport, UnprocessedRecordsService};

/// Body shared by the submit and pay actions.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectionRequest {
    pub actor_id: UserId,
    pub participant_ids: Vec<ParticipantId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmationRequest {
    pub actor_id: UserId,
    #[serde(default)]
    pub participant_ids: Option<Vec<ParticipantId>>,
}

/// Router builder exposing the unprocessed-records workflow.
pub fn declaration_router<S, E>(service: Arc<UnprocessedRecordsService<S, E>>) -> Router
where
    S: DeclarationStore + 'static,
    E: EventBus + 'static,
{
    Router::new()
        .route(
            "/api/v1/declarations/unprocessed",
            get(unprocessed_handler::<S, E>),
        )
        .route(
            "/api/v1/declarations/submissions",
            post(submit_handler::<S, E>),
        )
        .route(
            "/api/v1/declarations/submitted-payments",
            post(pay_submitted_handler::<S, E>),
        )
        .route(
            "/api/v1/declarations/:declaration_id/payment",
            get(payment_handler::<S, E>),
        )
        .route(
            "/api/v1/payments/:payment_id/confirmations",
            post(confirmation_handler::<S, E>),
        )
        .with_state(service)
}

/// HTTP status for a workflow error, shared with `AppError`.
pub(crate) fn error_status(error: &DeclarationWorkflowError) -> StatusCode {
    match error {
        DeclarationWorkflowError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DeclarationWorkflowError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        DeclarationWorkflowError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        DeclarationWorkflowError::Repository(RepositoryError::Unavailable(_))
        | DeclarationWorkflowError::Split(_)
        | DeclarationWorkflowError::PaymentCreation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(error: DeclarationWorkflowError) -> Response {
    let status = error_status(&error);
    let payload = json!({ "error": error.to_string() });
    (status, axum::Json(payload)).into_response()
}

fn submission_response(report: SubmissionReport) -> Response {
    let status = match (report.groups.len(), report.failed_groups()) {
        (_, 0) => StatusCode::OK,
        (total, failed) if failed < total => StatusCode::MULTI_STATUS,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, axum::Json(report)).into_response()
}

pub(crate) async fn unprocessed_handler<S, E>(
    State(service): State<Arc<UnprocessedRecordsService<S, E>>>,
    Query(filter): Query<ParticipantFilter>,
) -> Response
where
    S: DeclarationStore + 'static,
    E: EventBus + 'static,
{
    match service.load_page(&filter) {
        Ok(page) => (StatusCode::OK, axum::Json(page)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn submit_handler<S, E>(
    State(service): State<Arc<UnprocessedRecordsService<S, E>>>,
    axum::Json(request): axum::Json<SelectionRequest>,
) -> Response
where
    S: DeclarationStore + 'static,
    E: EventBus + 'static,
{
    let selection: BTreeSet<ParticipantId> = request.participant_ids.into_iter().collect();
    match service.submit_selection(&selection, &request.actor_id) {
        Ok(report) => submission_response(report),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn pay_submitted_handler<S, E>(
    State(service): State<Arc<UnprocessedRecordsService<S, E>>>,
    axum::Json(request): axum::Json<SelectionRequest>,
) -> Response
where
    S: DeclarationStore + 'static,
    E: EventBus + 'static,
{
    let selection: BTreeSet<ParticipantId> = request.participant_ids.into_iter().collect();
    match service.pay_submitted(&selection, &request.actor_id) {
        Ok(report) => submission_response(report),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn payment_handler<S, E>(
    State(service): State<Arc<UnprocessedRecordsService<S, E>>>,
    Path(declaration_id): Path<String>,
) -> Response
where
    S: DeclarationStore + 'static,
    E: EventBus + 'static,
{
    match service.view_payment(&DeclarationId(declaration_id)) {
        Ok(payment) => (StatusCode::OK, axum::Json(payment)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn confirmation_handler<S, E>(
    State(service): State<Arc<UnprocessedRecordsService<S, E>>>,
    Path(payment_id): Path<String>,
    axum::Json(request): axum::Json<ConfirmationRequest>,
) -> Response
where
    S: DeclarationStore + 'static,
    E: EventBus + 'static,
{
    match service.confirm_payment(
        &PaymentId(payment_id),
        request.participant_ids,
        &request.actor_id,
    ) {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}
