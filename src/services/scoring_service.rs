//! Judge score submission: normalizes a scoresheet, writes it through the
//! remote lock guard and kicks off the class re-evaluation.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    dao::{
        models::{ClassId, EntryEntity, EntryId, EntryPatch, Table},
        trial_store::TrialStore,
    },
    dto::entry::{BatchFailure, BatchScoreItem, BatchScoreResponse, ScoreSubmission},
    error::ServiceError,
    services::{
        completion_service,
        entry_service::{cache_entry, current_entry, spawn_sync, unlock_if_locked},
        sse_events,
    },
    state::{SharedState, class_status::CompletionHints, entry_status::status_after_score},
};

/// Write a scoresheet for one entry.
pub async fn submit_score(
    state: &SharedState,
    entry_id: EntryId,
    submission: ScoreSubmission,
) -> Result<EntryEntity, ServiceError> {
    submission.validate()?;

    let store = state.require_store().await?;
    let current = current_entry(state, &store, entry_id).await?;
    unlock_if_locked(&store, &current).await?;

    let patch = score_patch(&submission, OffsetDateTime::now_utc());
    let updated = store.update_entry(entry_id, patch).await?;
    cache_entry(state, &updated).await;
    sse_events::broadcast_entry_updated(state, &updated);

    let class_id = resolve_class_id(&store, &updated, submission.class_id).await;
    info!(
        entry_id,
        class_id,
        result = ?updated.result_status,
        "score submitted"
    );

    // A pending result takes a previously scored entry out of the tally.
    let hints = if updated.is_scored {
        CompletionHints::scored(entry_id)
    } else {
        CompletionHints {
            just_reset: Some(entry_id),
            is_reset: current.is_scored,
            ..CompletionHints::default()
        }
    };

    spawn_sync(state, Table::Entries);
    completion_service::spawn_completion_check(
        state,
        class_id,
        submission.paired_class_id,
        hints,
    );

    Ok(updated)
}

/// Submit several scoresheets; each item succeeds or fails on its own.
pub async fn submit_batch_scores(
    state: &SharedState,
    items: Vec<BatchScoreItem>,
) -> BatchScoreResponse {
    let mut response = BatchScoreResponse::default();

    for item in items {
        match submit_score(state, item.entry_id, item.score).await {
            Ok(entry) => response.succeeded.push(entry.id),
            Err(err) => {
                warn!(entry_id = item.entry_id, error = %err, "batch score item failed");
                response.failed.push(BatchFailure {
                    entry_id: item.entry_id,
                    message: err.to_string(),
                });
            }
        }
    }

    debug!(
        succeeded = response.succeeded.len(),
        failed = response.failed.len(),
        "batch scores processed"
    );
    response
}

/// Patch written for a submission.
///
/// Several area times replace the total search time with their sum.
fn score_patch(submission: &ScoreSubmission, now: OffsetDateTime) -> EntryPatch {
    let (is_scored, entry_status) = status_after_score(submission.result_status);

    let area = |index: usize| submission.area_times.get(index).copied().unwrap_or(0.0);
    let search_time = match submission.area_times.as_slice() {
        [] => submission.search_time_seconds.unwrap_or(0.0),
        [single] => submission.search_time_seconds.unwrap_or(*single),
        several => several.iter().sum(),
    };

    EntryPatch {
        search_time_seconds: Some(search_time),
        area1_time_seconds: Some(area(0)),
        area2_time_seconds: Some(area(1)),
        area3_time_seconds: Some(area(2)),
        fault_count: Some(submission.fault_count),
        correct_count: Some(submission.correct_count),
        incorrect_count: Some(submission.incorrect_count),
        points: Some(submission.points),
        total_score: Some(submission.total_score),
        is_scored: Some(is_scored),
        result_status: Some(submission.result_status),
        entry_status: Some(entry_status),
        scoring_completed_at: is_scored.then_some(Some(now)),
        ..EntryPatch::default()
    }
}

async fn resolve_class_id(
    store: &Arc<dyn TrialStore>,
    entry: &EntryEntity,
    given: Option<ClassId>,
) -> ClassId {
    if let Some(class_id) = given {
        return class_id;
    }

    match store.find_class_id_for_entry(entry.id).await {
        Ok(Some(class_id)) => class_id,
        Ok(None) => entry.class_id,
        Err(err) => {
            warn!(entry_id = entry.id, error = %err, "class lookup failed; using the entry row");
            entry.class_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::ClassEntity,
            trial_store::memory::{MemoryTrialStore, OP_UNLOCK_ENTRY},
        },
        state::{
            AppState,
            entry_status::{EntryStatus, ResultStatus},
        },
    };

    async fn setup() -> (SharedState, MemoryTrialStore) {
        let store = MemoryTrialStore::new();
        store.insert_class(ClassEntity::new(1, 1, "Exterior", "Advanced")).await;
        store.insert_entry(EntryEntity::new(1, 1, 201)).await;
        store.insert_entry(EntryEntity::new(2, 1, 202)).await;
        let state = AppState::with_store(AppConfig::default(), Arc::new(store.clone())).await;
        (state, store)
    }

    #[test]
    fn multi_area_times_are_summed() {
        let mut submission = ScoreSubmission::with_result(ResultStatus::Qualified);
        submission.search_time_seconds = Some(999.0);
        submission.area_times = vec![30.5, 20.0, 9.5];

        let now = OffsetDateTime::now_utc();
        let patch = score_patch(&submission, now);
        assert_eq!(patch.search_time_seconds, Some(60.0));
        assert_eq!(patch.area3_time_seconds, Some(9.5));
        assert_eq!(patch.is_scored, Some(true));
        assert_eq!(patch.entry_status, Some(EntryStatus::Completed));
        assert_eq!(patch.scoring_completed_at, Some(Some(now)));
    }

    #[test]
    fn pending_results_keep_the_entry_in_the_ring() {
        let mut submission = ScoreSubmission::with_result(ResultStatus::Pending);
        submission.search_time_seconds = Some(12.0);

        let patch = score_patch(&submission, OffsetDateTime::now_utc());
        assert_eq!(patch.search_time_seconds, Some(12.0));
        assert_eq!(patch.is_scored, Some(false));
        assert_eq!(patch.entry_status, Some(EntryStatus::InRing));
        assert_eq!(patch.scoring_completed_at, None);
    }

    #[tokio::test]
    async fn rescoring_a_locked_entry_unlocks_it_first() {
        let (state, store) = setup().await;
        submit_score(&state, 1, ScoreSubmission::with_result(ResultStatus::Qualified))
            .await
            .unwrap();
        state.tasks().wait_idle().await;
        assert!(store.entry(1).await.unwrap().is_locked);

        let mut rescore = ScoreSubmission::with_result(ResultStatus::NotQualified);
        rescore.fault_count = 3;
        let entry = submit_score(&state, 1, rescore).await.unwrap();

        assert_eq!(store.calls(OP_UNLOCK_ENTRY), 1);
        assert_eq!(entry.fault_count, 3);
        assert_eq!(entry.result_status, ResultStatus::NotQualified);
    }

    #[tokio::test]
    async fn invalid_submissions_never_reach_the_store() {
        let (state, store) = setup().await;
        let mut submission = ScoreSubmission::with_result(ResultStatus::Qualified);
        submission.fault_count = -2;

        let err = submit_score(&state, 1, submission).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert!(!store.entry(1).await.unwrap().is_scored);
    }

    #[tokio::test]
    async fn batch_collects_successes_and_failures() {
        let (state, _store) = setup().await;
        let items = vec![
            BatchScoreItem {
                entry_id: 1,
                score: ScoreSubmission::with_result(ResultStatus::Qualified),
            },
            BatchScoreItem {
                entry_id: 77,
                score: ScoreSubmission::with_result(ResultStatus::Qualified),
            },
            BatchScoreItem {
                entry_id: 2,
                score: ScoreSubmission::with_result(ResultStatus::Absent),
            },
        ];

        let response = submit_batch_scores(&state, items).await;
        state.tasks().wait_idle().await;

        assert_eq!(response.succeeded, vec![1, 2]);
        assert_eq!(response.failed.len(), 1);
        assert_eq!(response.failed[0].entry_id, 77);
    }
}
