//! Class completion evaluation: recomputes a class status from the scored
//! entries and starts the placement recalculation once the class completes.

use std::{convert::Infallible, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{ClassEntity, ClassId, ClassPatch, EntryEntity},
        storage::StorageResult,
        trial_store::TrialStore,
    },
    error::ServiceError,
    services::{placement_service, report_mirror_error, sse_events},
    state::{
        SharedState,
        class_status::{ClassStatus, CompletionHints, EntrySource, ScoreTally},
    },
};

/// What the evaluator did with one class.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// The class status was rewritten.
    Updated {
        /// Status written to the class.
        status: ClassStatus,
        /// Counts the status was resolved from.
        tally: ScoreTally,
        /// Where the entry rows came from.
        source: EntrySource,
    },
    /// The class already carries the resolved status; nothing was written.
    Unchanged {
        /// Current and resolved status.
        status: ClassStatus,
        /// Counts the status was resolved from.
        tally: ScoreTally,
    },
    /// The score did not cross the first/last boundary; nothing was written.
    Skipped {
        /// Counts seen by the evaluator.
        tally: ScoreTally,
    },
    /// Fetching entries or writing the status failed; the error was logged.
    Failed {
        /// Error message of the failed step.
        reason: String,
    },
}

/// Evaluation result of one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassEvaluation {
    /// Evaluated class.
    pub class_id: ClassId,
    /// What happened to it.
    pub outcome: CompletionOutcome,
}

/// Run [`check_class_completion`] in the background.
pub fn spawn_completion_check(
    state: &SharedState,
    class_id: ClassId,
    paired_class_id: Option<ClassId>,
    hints: CompletionHints,
) {
    let task_state = state.clone();
    state.tasks().spawn("class_completion_check", async move {
        check_class_completion(&task_state, class_id, paired_class_id, hints).await;
        Ok::<(), Infallible>(())
    });
}

/// Re-evaluate the status of a class and, when given, of its paired class.
///
/// Never fails: problems are logged and reported as [`CompletionOutcome::Failed`].
pub async fn check_class_completion(
    state: &SharedState,
    class_id: ClassId,
    paired_class_id: Option<ClassId>,
    hints: CompletionHints,
) -> Vec<ClassEvaluation> {
    let mut class_ids = vec![class_id];
    if let Some(paired) = paired_class_id.filter(|paired| *paired != class_id) {
        class_ids.push(paired);
    }

    let store = match state.require_store().await {
        Ok(store) => store,
        Err(err) => {
            warn!(class_id, error = %err, "skipping completion check");
            return class_ids
                .into_iter()
                .map(|class_id| ClassEvaluation {
                    class_id,
                    outcome: CompletionOutcome::Failed {
                        reason: err.to_string(),
                    },
                })
                .collect();
        }
    };

    let mut evaluations = Vec::with_capacity(class_ids.len());
    for class_id in class_ids {
        let outcome = evaluate_class(state, &store, class_id, &hints).await;
        evaluations.push(ClassEvaluation { class_id, outcome });
    }
    evaluations
}

/// Current class row and its scored/total counts.
pub async fn class_overview(
    state: &SharedState,
    class_id: ClassId,
) -> Result<(ClassEntity, ScoreTally), ServiceError> {
    let store = state.require_store().await?;
    let class = match state.mirror().class(class_id).await {
        Some(class) => class,
        None => store
            .find_class(class_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("class `{class_id}`")))?,
    };

    let (entries, source) = class_entries(state, &store, class_id).await?;
    let tally = ScoreTally::count(&entries, source, &CompletionHints::default(), false);
    Ok((class, tally))
}

/// Entries of a class, from the mirror when the whole roster is mirrored.
async fn class_entries(
    state: &SharedState,
    store: &Arc<dyn TrialStore>,
    class_id: ClassId,
) -> StorageResult<(Vec<EntryEntity>, EntrySource)> {
    if state.sync().is_mirrored(class_id) {
        if let Some(table) = state.mirror().entries().await {
            let entries = table.entries_for_class(class_id);
            if !entries.is_empty() {
                return Ok((entries, EntrySource::Mirror));
            }
        }
    }

    let entries = store.list_class_entries(class_id).await?;
    Ok((entries, EntrySource::Remote))
}

/// Status the class carries now: mirror first, remote otherwise.
async fn current_status(
    state: &SharedState,
    store: &Arc<dyn TrialStore>,
    class_id: ClassId,
) -> Option<ClassStatus> {
    if let Some(class) = state.mirror().class(class_id).await {
        return Some(class.class_status);
    }

    match store.find_class(class_id).await {
        Ok(class) => class.map(|class| class.class_status),
        Err(err) => {
            debug!(class_id, error = %err, "class status unknown; writing the resolved one");
            None
        }
    }
}

async fn evaluate_class(
    state: &SharedState,
    store: &Arc<dyn TrialStore>,
    class_id: ClassId,
    hints: &CompletionHints,
) -> CompletionOutcome {
    let lock = state.class_lock(class_id);
    let _guard = lock.lock().await;

    let (entries, source) = match class_entries(state, store, class_id).await {
        Ok(found) => found,
        Err(err) => {
            warn!(class_id, error = %err, "failed to fetch class entries for completion check");
            return CompletionOutcome::Failed {
                reason: err.to_string(),
            };
        }
    };

    let tally = ScoreTally::count(&entries, source, hints, state.config().lag_compensation);
    if !tally.crosses_boundary(hints.is_reset) {
        debug!(
            class_id,
            scored = tally.scored,
            total = tally.total,
            "score inside the class; status unchanged"
        );
        return CompletionOutcome::Skipped { tally };
    }

    let status = tally.resolve();
    if current_status(state, store, class_id).await == Some(status) {
        debug!(class_id, status = status.as_str(), "class status already current");
        return CompletionOutcome::Unchanged { status, tally };
    }

    let patch = ClassPatch {
        class_status: Some(status),
        ..ClassPatch::default()
    };
    let class = match store.update_class(class_id, patch).await {
        Ok(class) => class,
        Err(err) => {
            warn!(class_id, error = %err, "failed to write class status");
            return CompletionOutcome::Failed {
                reason: err.to_string(),
            };
        }
    };

    if let Err(err) = state.mirror().store_class(class.clone()).await {
        report_mirror_error(&err);
    }
    sse_events::broadcast_class_status_changed(state, class_id, status, tally);
    info!(
        class_id,
        status = status.as_str(),
        scored = tally.scored,
        total = tally.total,
        source = ?source,
        "class status updated"
    );

    if status == ClassStatus::Completed {
        if let Err(err) = placement_service::recalculate_class_placements(store, &class).await {
            warn!(class_id, error = %err, "placement recalculation failed; class stays completed");
        }
    }

    CompletionOutcome::Updated {
        status,
        tally,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::{EntryPatch, ShowEntity, TrialEntity},
            trial_store::memory::{MemoryTrialStore, OP_RECALCULATE_PLACEMENTS, OP_UPDATE_CLASS},
        },
        state::{AppState, entry_status::ResultStatus},
    };

    async fn class_with_entries(count: i64) -> (SharedState, MemoryTrialStore) {
        let store = MemoryTrialStore::new();
        store
            .insert_show(ShowEntity {
                id: 1,
                license_key: "LK-1".into(),
                show_type: "Regular".into(),
            })
            .await;
        store
            .insert_trial(TrialEntity {
                id: 1,
                show_id: 1,
                trial_name: "Trial 1".into(),
            })
            .await;
        store.insert_class(ClassEntity::new(1, 1, "Containers", "Novice A")).await;
        for id in 1..=count {
            store.insert_entry(EntryEntity::new(id, 1, 100 + id as i32)).await;
        }

        let state = AppState::with_store(AppConfig::default(), Arc::new(store.clone())).await;
        (state, store)
    }

    async fn score(store: &MemoryTrialStore, id: i64) {
        store
            .update_entry(
                id,
                EntryPatch {
                    is_scored: Some(true),
                    result_status: Some(ResultStatus::Qualified),
                    ..EntryPatch::default()
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn first_score_moves_the_class_in_progress() {
        let (state, store) = class_with_entries(3).await;
        score(&store, 1).await;

        let results = check_class_completion(&state, 1, None, CompletionHints::scored(1)).await;
        assert!(matches!(
            results[0].outcome,
            CompletionOutcome::Updated {
                status: ClassStatus::InProgress,
                source: EntrySource::Remote,
                ..
            }
        ));
        assert_eq!(
            store.class(1).await.unwrap().class_status,
            ClassStatus::InProgress
        );
    }

    #[tokio::test]
    async fn middle_scores_are_skipped() {
        let (state, store) = class_with_entries(3).await;
        score(&store, 1).await;
        score(&store, 2).await;

        let results = check_class_completion(&state, 1, None, CompletionHints::scored(2)).await;
        assert_eq!(
            results[0].outcome,
            CompletionOutcome::Skipped {
                tally: ScoreTally { scored: 2, total: 3 }
            }
        );
        assert_eq!(store.calls(OP_UPDATE_CLASS), 0);
    }

    #[tokio::test]
    async fn completion_triggers_placements_and_survives_their_failure() {
        let (state, store) = class_with_entries(2).await;
        score(&store, 1).await;
        score(&store, 2).await;
        store.fail_next(OP_RECALCULATE_PLACEMENTS, 1);

        let results = check_class_completion(&state, 1, None, CompletionHints::scored(2)).await;
        assert!(matches!(
            results[0].outcome,
            CompletionOutcome::Updated {
                status: ClassStatus::Completed,
                ..
            }
        ));
        assert_eq!(store.calls(OP_RECALCULATE_PLACEMENTS), 1);
        assert_eq!(
            store.class(1).await.unwrap().class_status,
            ClassStatus::Completed
        );
    }

    #[tokio::test]
    async fn paired_class_is_evaluated_with_the_same_hints() {
        let (state, store) = class_with_entries(1).await;
        store.insert_class(ClassEntity::new(2, 1, "Containers", "Novice B")).await;
        store.insert_entry(EntryEntity::new(9, 2, 900)).await;
        store.insert_entry(EntryEntity::new(8, 2, 800)).await;
        score(&store, 1).await;
        score(&store, 9).await;

        let results = check_class_completion(&state, 1, Some(2), CompletionHints::scored(1)).await;
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0].outcome,
            CompletionOutcome::Updated {
                status: ClassStatus::Completed,
                ..
            }
        ));
        assert_eq!(results[1].class_id, 2);
        assert!(matches!(
            results[1].outcome,
            CompletionOutcome::Updated {
                status: ClassStatus::InProgress,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn resolving_the_current_status_writes_nothing() {
        let (state, store) = class_with_entries(2).await;
        score(&store, 1).await;
        score(&store, 2).await;

        check_class_completion(&state, 1, None, CompletionHints::scored(2)).await;
        let results = check_class_completion(&state, 1, None, CompletionHints::scored(1)).await;

        assert!(matches!(
            results[0].outcome,
            CompletionOutcome::Unchanged {
                status: ClassStatus::Completed,
                ..
            }
        ));
        assert_eq!(store.calls(OP_UPDATE_CLASS), 1);
        assert_eq!(store.calls(OP_RECALCULATE_PLACEMENTS), 1);
    }

    #[tokio::test]
    async fn concurrent_checks_of_one_class_recalculate_once() {
        let (state, store) = class_with_entries(3).await;
        for id in 1..=3 {
            score(&store, id).await;
        }

        for id in 1..=3 {
            spawn_completion_check(&state, 1, None, CompletionHints::scored(id));
        }
        state.tasks().wait_idle().await;

        assert_eq!(store.calls(OP_UPDATE_CLASS), 1);
        assert_eq!(store.calls(OP_RECALCULATE_PLACEMENTS), 1);
        assert_eq!(
            store.class(1).await.unwrap().class_status,
            ClassStatus::Completed
        );
    }

    #[tokio::test]
    async fn status_write_failures_are_reported_not_raised() {
        let (state, store) = class_with_entries(1).await;
        score(&store, 1).await;
        store.fail_next(OP_UPDATE_CLASS, 1);

        let results = check_class_completion(&state, 1, None, CompletionHints::scored(1)).await;
        assert!(matches!(results[0].outcome, CompletionOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn degraded_mode_fails_every_requested_class() {
        let state = AppState::new(AppConfig::default());
        let results = check_class_completion(&state, 1, Some(2), CompletionHints::default()).await;
        assert_eq!(results.len(), 2);
        assert!(
            results
                .iter()
                .all(|result| matches!(result.outcome, CompletionOutcome::Failed { .. }))
        );
    }
}
