//! Entry status operations driven by the ring steward: ring moves, check-in,
//! manual completion and score reset.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{
    dao::{
        models::{ClassId, EntryEntity, EntryId, EntryPatch, Table},
        trial_store::TrialStore,
    },
    error::ServiceError,
    services::{completion_service, report_mirror_error, sse_events},
    state::{
        SharedState,
        class_status::CompletionHints,
        entry_status::{
            EntryStatus, ResultStatus, RingMove, RingPlan, needs_manual_completion, plan_checkin,
            plan_ring_move,
        },
    },
};

/// Result of an entry operation.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryUpdate {
    /// The remote row was written.
    Updated(EntryEntity),
    /// The entry already was in the requested state; nothing was written.
    Unchanged(EntryEntity),
}

impl EntryUpdate {
    /// Entry after the operation.
    pub fn entry(&self) -> &EntryEntity {
        match self {
            EntryUpdate::Updated(entry) | EntryUpdate::Unchanged(entry) => entry,
        }
    }

    /// Take the entry out.
    pub fn into_entry(self) -> EntryEntity {
        match self {
            EntryUpdate::Updated(entry) | EntryUpdate::Unchanged(entry) => entry,
        }
    }

    /// Whether the remote row was written.
    pub fn is_changed(&self) -> bool {
        matches!(self, EntryUpdate::Updated(_))
    }
}

/// Current state of an entry: mirror first, remote read otherwise.
pub async fn get_entry(state: &SharedState, entry_id: EntryId) -> Result<EntryEntity, ServiceError> {
    let store = state.require_store().await?;
    current_entry(state, &store, entry_id).await
}

/// Move an entry in or out of the ring.
pub async fn mark_in_ring(
    state: &SharedState,
    entry_id: EntryId,
    in_ring: bool,
) -> Result<EntryUpdate, ServiceError> {
    let store = state.require_store().await?;
    let current = current_entry(state, &store, entry_id).await?;
    let movement = RingMove::from_flag(in_ring);

    let target = match plan_ring_move(current.entry_status, current.is_scored, movement)? {
        RingPlan::AlreadyThere => {
            debug!(entry_id, in_ring, "ring state unchanged");
            return Ok(EntryUpdate::Unchanged(current));
        }
        RingPlan::MoveTo(target) => target,
    };

    let now = OffsetDateTime::now_utc();
    let mut patch = EntryPatch::status(target);
    match movement {
        RingMove::Enter => patch.ring_entered_at = Some(Some(now)),
        RingMove::Exit => patch.ring_exited_at = Some(Some(now)),
    }

    let updated = store.update_entry(entry_id, patch).await?;
    cache_entry(state, &updated).await;
    sse_events::broadcast_entry_updated(state, &updated);
    info!(entry_id, status = target.as_str(), "ring status updated");

    Ok(EntryUpdate::Updated(updated))
}

/// Mark an entry complete without a scoresheet.
pub async fn mark_entry_completed(
    state: &SharedState,
    entry_id: EntryId,
    paired_class_id: Option<ClassId>,
) -> Result<EntryUpdate, ServiceError> {
    let store = state.require_store().await?;
    let current = current_entry(state, &store, entry_id).await?;

    if !needs_manual_completion(current.is_scored) {
        debug!(entry_id, "entry already scored; manual completion skipped");
        return Ok(EntryUpdate::Unchanged(current));
    }

    unlock_if_locked(&store, &current).await?;

    let patch = EntryPatch {
        entry_status: Some(EntryStatus::Completed),
        is_scored: Some(true),
        result_status: Some(ResultStatus::ManualComplete),
        scoring_completed_at: Some(Some(OffsetDateTime::now_utc())),
        ..EntryPatch::default()
    };
    let updated = store.update_entry(entry_id, patch).await?;
    cache_entry(state, &updated).await;
    sse_events::broadcast_entry_updated(state, &updated);
    info!(entry_id, "entry marked complete manually");

    spawn_sync(state, Table::Entries);
    completion_service::spawn_completion_check(
        state,
        updated.class_id,
        paired_class_id,
        CompletionHints::scored(entry_id),
    );

    Ok(EntryUpdate::Updated(updated))
}

/// Change the check-in status, then give the background sync time to propagate.
pub async fn update_checkin(
    state: &SharedState,
    entry_id: EntryId,
    status: EntryStatus,
) -> Result<EntryUpdate, ServiceError> {
    if !status.is_checkin_value() {
        return Err(ServiceError::InvalidInput(format!(
            "`{}` is not a check-in status",
            status.as_str()
        )));
    }

    let store = state.require_store().await?;
    let current = current_entry(state, &store, entry_id).await?;
    let target = plan_checkin(current.entry_status, current.is_scored, status)?;

    let updated = store
        .update_entry(entry_id, EntryPatch::status(target))
        .await?;
    cache_entry(state, &updated).await;
    sse_events::broadcast_entry_updated(state, &updated);
    info!(entry_id, status = target.as_str(), "check-in updated");

    spawn_sync(state, Table::Entries);
    let settle_delay = state.config().checkin_settle_delay;
    if !settle_delay.is_zero() {
        tokio::time::sleep(settle_delay).await;
    }

    Ok(EntryUpdate::Updated(updated))
}

/// Clear every scoring field of an entry and re-evaluate its class.
pub async fn reset_score(
    state: &SharedState,
    entry_id: EntryId,
    paired_class_id: Option<ClassId>,
) -> Result<EntryEntity, ServiceError> {
    let store = state.require_store().await?;
    let current = current_entry(state, &store, entry_id).await?;

    if current.is_scored || current.is_locked {
        store.unlock_entry(entry_id).await?;
        debug!(entry_id, "entry unlocked before reset");
    }

    let patch = EntryPatch {
        search_time_seconds: Some(0.0),
        area1_time_seconds: Some(0.0),
        area2_time_seconds: Some(0.0),
        area3_time_seconds: Some(0.0),
        fault_count: Some(0),
        correct_count: Some(0),
        incorrect_count: Some(0),
        points: Some(0.0),
        total_score: Some(0.0),
        final_placement: Some(0),
        is_scored: Some(false),
        result_status: Some(ResultStatus::Pending),
        entry_status: Some(EntryStatus::NoStatus),
        scoring_completed_at: Some(None),
        ring_entered_at: Some(None),
        ring_exited_at: Some(None),
        updated_at: None,
    };
    let updated = store.update_entry(entry_id, patch).await?;
    cache_entry(state, &updated).await;
    sse_events::broadcast_entry_updated(state, &updated);
    info!(entry_id, class_id = updated.class_id, "score reset");

    spawn_sync(state, Table::Entries);
    completion_service::spawn_completion_check(
        state,
        updated.class_id,
        paired_class_id,
        CompletionHints::reset(entry_id),
    );

    Ok(updated)
}

pub(crate) async fn current_entry(
    state: &SharedState,
    store: &Arc<dyn TrialStore>,
    entry_id: EntryId,
) -> Result<EntryEntity, ServiceError> {
    if let Some(entry) = state.mirror().entry(entry_id).await {
        return Ok(entry);
    }

    store
        .find_entry(entry_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("entry `{entry_id}`")))
}

pub(crate) async fn unlock_if_locked(
    store: &Arc<dyn TrialStore>,
    entry: &EntryEntity,
) -> Result<(), ServiceError> {
    if entry.is_locked {
        store.unlock_entry(entry.id).await?;
        debug!(entry_id = entry.id, "entry unlocked before rewrite");
    }
    Ok(())
}

/// Write-through of a row the remote store just accepted.
pub(crate) async fn cache_entry(state: &SharedState, entry: &EntryEntity) {
    if let Err(err) = state.mirror().store_entry(entry.clone()).await {
        report_mirror_error(&err);
    }
}

/// Fire-and-forget sync pass for `table`.
pub(crate) fn spawn_sync(state: &SharedState, table: Table) {
    let task_state = state.clone();
    state.tasks().spawn("sync_trigger", async move {
        task_state
            .sync()
            .trigger(&task_state, table)
            .await
            .map(|_| ())
    });
}
