use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the trial scoring backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::public_stream,
        crate::routes::entries::get_entry,
        crate::routes::entries::submit_score,
        crate::routes::entries::submit_batch_scores,
        crate::routes::entries::reset_score,
        crate::routes::entries::mark_in_ring,
        crate::routes::entries::update_checkin,
        crate::routes::entries::mark_completed,
        crate::routes::classes::get_class,
        crate::routes::classes::watch_class,
        crate::routes::classes::check_completion,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::entry::EntrySummary,
            crate::dto::entry::EntryUpdateResponse,
            crate::dto::entry::ScoreSubmission,
            crate::dto::entry::BatchScoreItem,
            crate::dto::entry::BatchScoreRequest,
            crate::dto::entry::BatchFailure,
            crate::dto::entry::BatchScoreResponse,
            crate::dto::entry::RingRequest,
            crate::dto::entry::CheckinRequest,
            crate::dto::class::ClassSummary,
            crate::dto::class::CompletionCheckRequest,
            crate::dto::class::ClassEvaluationResult,
            crate::dto::class::CompletionCheckResponse,
            crate::dto::class::WatchResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::EntryUpdatedEvent,
            crate::dto::sse::ClassStatusChangedEvent,
            crate::state::entry_status::EntryStatus,
            crate::state::entry_status::ResultStatus,
            crate::state::class_status::ClassStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "entries", description = "Scoring and ring status of entries"),
        (name = "classes", description = "Class progress and completion"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/sse/public",
            "/entries/{id}",
            "/entries/{id}/score",
            "/entries/scores/batch",
            "/entries/{id}/reset",
            "/entries/{id}/ring",
            "/entries/{id}/checkin",
            "/entries/{id}/complete",
            "/classes/{id}",
            "/classes/{id}/watch",
            "/classes/{id}/completion-check",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
