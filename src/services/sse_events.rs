use serde::Serialize;
use tracing::warn;

use crate::{
    dao::models::{ClassId, EntryEntity},
    dto::{
        entry::EntrySummary,
        sse::{ClassStatusChangedEvent, EntryUpdatedEvent, ServerEvent, SystemStatus},
    },
    state::{
        SharedState,
        class_status::{ClassStatus, ScoreTally},
    },
};

const EVENT_ENTRY_UPDATED: &str = "entry.updated";
const EVENT_CLASS_STATUS_CHANGED: &str = "class.status_changed";
const EVENT_SYSTEM_STATUS: &str = "system.status";

/// Broadcast the latest state of an entry.
pub fn broadcast_entry_updated(state: &SharedState, entry: &EntryEntity) {
    let payload = EntryUpdatedEvent {
        entry: EntrySummary::from(entry),
    };
    send_public_event(state, EVENT_ENTRY_UPDATED, &payload);
}

/// Broadcast a class status written by the completion evaluator.
pub fn broadcast_class_status_changed(
    state: &SharedState,
    class_id: ClassId,
    status: ClassStatus,
    tally: ScoreTally,
) {
    let payload = ClassStatusChangedEvent {
        class_id,
        status,
        scored: tally.scored,
        total: tally.total,
    };
    send_public_event(state, EVENT_CLASS_STATUS_CHANGED, &payload);
}

/// Broadcast whether the backend runs in degraded mode.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    send_public_event(state, EVENT_SYSTEM_STATUS, &SystemStatus { degraded });
}

fn send_public_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.public_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize public SSE payload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, state::AppState};

    #[tokio::test]
    async fn class_status_events_carry_the_tally() {
        let state = AppState::new(AppConfig::default());
        let mut receiver = state.public_sse().subscribe();

        broadcast_class_status_changed(
            &state,
            4,
            ClassStatus::InProgress,
            ScoreTally { scored: 1, total: 3 },
        );

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some(EVENT_CLASS_STATUS_CHANGED));
        let data: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(data["status"], "in_progress");
        assert_eq!(data["scored"], 1);
    }
}
