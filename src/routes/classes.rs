use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use crate::{
    dao::models::ClassId,
    dto::class::{
        ClassEvaluationResult, ClassSummary, CompletionCheckRequest, CompletionCheckResponse,
        WatchResponse,
    },
    error::AppError,
    services::completion_service,
    state::{SharedState, class_status::CompletionHints},
};

/// Class progress, mirror watch and manual re-evaluation endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/classes/{id}", get(get_class))
        .route("/classes/{id}/watch", post(watch_class))
        .route("/classes/{id}/completion-check", post(check_completion))
}

/// Retrieve a class with its scored/total counts.
#[utoipa::path(
    get,
    path = "/classes/{id}",
    tag = "classes",
    params(("id" = i64, Path, description = "Class identifier")),
    responses(
        (status = 200, description = "Class", body = ClassSummary),
        (status = 404, description = "Unknown class")
    )
)]
pub async fn get_class(
    State(state): State<SharedState>,
    Path(id): Path<ClassId>,
) -> Result<Json<ClassSummary>, AppError> {
    let overview = completion_service::class_overview(&state, id).await?;
    Ok(Json(ClassSummary::from(overview)))
}

/// Load a class into the local mirror and follow its remote changes.
#[utoipa::path(
    post,
    path = "/classes/{id}/watch",
    tag = "classes",
    params(("id" = i64, Path, description = "Class identifier")),
    responses((status = 200, description = "Class watched", body = WatchResponse))
)]
pub async fn watch_class(
    State(state): State<SharedState>,
    Path(id): Path<ClassId>,
) -> Result<Json<WatchResponse>, AppError> {
    state.sync().watch_class(&state, id).await?;
    Ok(Json(WatchResponse {
        class_id: id,
        sync_running: state.sync().is_running().await,
        watched_classes: state.sync().watched_classes(),
    }))
}

/// Re-evaluate the status of a class, and of its paired class when given.
#[utoipa::path(
    post,
    path = "/classes/{id}/completion-check",
    tag = "classes",
    params(("id" = i64, Path, description = "Class identifier")),
    request_body = CompletionCheckRequest,
    responses((status = 200, description = "Evaluation per class", body = CompletionCheckResponse))
)]
pub async fn check_completion(
    State(state): State<SharedState>,
    Path(id): Path<ClassId>,
    Json(payload): Json<CompletionCheckRequest>,
) -> Json<CompletionCheckResponse> {
    let hints = CompletionHints {
        just_scored: payload.just_scored,
        just_reset: payload.just_reset,
        is_reset: payload.is_reset,
    };
    let results =
        completion_service::check_class_completion(&state, id, payload.paired_class_id, hints)
            .await
            .into_iter()
            .map(ClassEvaluationResult::from)
            .collect();
    Json(CompletionCheckResponse { results })
}
