use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dao::models::EntryId,
    dto::entry::{
        BatchScoreRequest, BatchScoreResponse, CheckinRequest, EntrySummary, EntryUpdateResponse,
        PairedClassParams, RingRequest, ScoreSubmission,
    },
    error::AppError,
    services::{entry_service, entry_service::EntryUpdate, scoring_service},
    state::SharedState,
};

/// Entry scoring and status endpoints used by the judge and ring steward.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/entries/{id}", get(get_entry))
        .route("/entries/{id}/score", post(submit_score))
        .route("/entries/scores/batch", post(submit_batch_scores))
        .route("/entries/{id}/reset", post(reset_score))
        .route("/entries/{id}/ring", post(mark_in_ring))
        .route("/entries/{id}/checkin", post(update_checkin))
        .route("/entries/{id}/complete", post(mark_completed))
}

fn update_response(update: EntryUpdate) -> EntryUpdateResponse {
    EntryUpdateResponse {
        changed: update.is_changed(),
        entry: EntrySummary::from(update.entry()),
    }
}

/// Retrieve the current state of an entry.
#[utoipa::path(
    get,
    path = "/entries/{id}",
    tag = "entries",
    params(("id" = i64, Path, description = "Entry identifier")),
    responses(
        (status = 200, description = "Entry", body = EntrySummary),
        (status = 404, description = "Unknown entry")
    )
)]
pub async fn get_entry(
    State(state): State<SharedState>,
    Path(id): Path<EntryId>,
) -> Result<Json<EntrySummary>, AppError> {
    let entry = entry_service::get_entry(&state, id).await?;
    Ok(Json(EntrySummary::from(&entry)))
}

/// Submit the judge's scoresheet for an entry.
#[utoipa::path(
    post,
    path = "/entries/{id}/score",
    tag = "entries",
    params(("id" = i64, Path, description = "Entry identifier")),
    request_body = ScoreSubmission,
    responses(
        (status = 200, description = "Score written", body = EntrySummary),
        (status = 400, description = "Invalid scoresheet"),
        (status = 409, description = "Entry locked by the remote store")
    )
)]
pub async fn submit_score(
    State(state): State<SharedState>,
    Path(id): Path<EntryId>,
    Valid(Json(payload)): Valid<Json<ScoreSubmission>>,
) -> Result<Json<EntrySummary>, AppError> {
    let entry = scoring_service::submit_score(&state, id, payload).await?;
    Ok(Json(EntrySummary::from(&entry)))
}

/// Submit several scoresheets at once; each item succeeds or fails independently.
#[utoipa::path(
    post,
    path = "/entries/scores/batch",
    tag = "entries",
    request_body = BatchScoreRequest,
    responses((status = 200, description = "Per-item outcome", body = BatchScoreResponse))
)]
pub async fn submit_batch_scores(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<BatchScoreRequest>>,
) -> Json<BatchScoreResponse> {
    Json(scoring_service::submit_batch_scores(&state, payload.items).await)
}

/// Clear the score of an entry.
#[utoipa::path(
    post,
    path = "/entries/{id}/reset",
    tag = "entries",
    params(("id" = i64, Path, description = "Entry identifier"), PairedClassParams),
    responses((status = 200, description = "Score cleared", body = EntrySummary))
)]
pub async fn reset_score(
    State(state): State<SharedState>,
    Path(id): Path<EntryId>,
    Query(params): Query<PairedClassParams>,
) -> Result<Json<EntrySummary>, AppError> {
    let entry = entry_service::reset_score(&state, id, params.paired_class_id).await?;
    Ok(Json(EntrySummary::from(&entry)))
}

/// Move an entry in or out of the ring.
#[utoipa::path(
    post,
    path = "/entries/{id}/ring",
    tag = "entries",
    params(("id" = i64, Path, description = "Entry identifier")),
    request_body = RingRequest,
    responses(
        (status = 200, description = "Ring status", body = EntryUpdateResponse),
        (status = 409, description = "Scored entries cannot enter the ring")
    )
)]
pub async fn mark_in_ring(
    State(state): State<SharedState>,
    Path(id): Path<EntryId>,
    Json(payload): Json<RingRequest>,
) -> Result<Json<EntryUpdateResponse>, AppError> {
    let update = entry_service::mark_in_ring(&state, id, payload.in_ring).await?;
    Ok(Json(update_response(update)))
}

/// Change the check-in status of an entry.
#[utoipa::path(
    post,
    path = "/entries/{id}/checkin",
    tag = "entries",
    params(("id" = i64, Path, description = "Entry identifier")),
    request_body = CheckinRequest,
    responses(
        (status = 200, description = "Check-in status", body = EntryUpdateResponse),
        (status = 400, description = "Not a check-in status")
    )
)]
pub async fn update_checkin(
    State(state): State<SharedState>,
    Path(id): Path<EntryId>,
    Json(payload): Json<CheckinRequest>,
) -> Result<Json<EntryUpdateResponse>, AppError> {
    let update = entry_service::update_checkin(&state, id, payload.status).await?;
    Ok(Json(update_response(update)))
}

/// Mark an entry complete without a scoresheet.
#[utoipa::path(
    post,
    path = "/entries/{id}/complete",
    tag = "entries",
    params(("id" = i64, Path, description = "Entry identifier"), PairedClassParams),
    responses((status = 200, description = "Entry completed", body = EntryUpdateResponse))
)]
pub async fn mark_completed(
    State(state): State<SharedState>,
    Path(id): Path<EntryId>,
    Query(params): Query<PairedClassParams>,
) -> Result<Json<EntryUpdateResponse>, AppError> {
    let update = entry_service::mark_entry_completed(&state, id, params.paired_class_id).await?;
    Ok(Json(update_response(update)))
}
