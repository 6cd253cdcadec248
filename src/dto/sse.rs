use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    dao::models::ClassId,
    dto::entry::EntrySummary,
    state::class_status::ClassStatus,
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE event name.
    pub event: Option<String>,
    /// JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream.
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    /// Whether the backend runs without storage.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast whenever an entry row changed, locally or remotely.
pub struct EntryUpdatedEvent {
    /// Entry after the change.
    pub entry: EntrySummary,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the completion evaluator rewrote a class status.
pub struct ClassStatusChangedEvent {
    /// Class whose status changed.
    pub class_id: ClassId,
    /// New status.
    pub status: ClassStatus,
    /// Entries with a final result.
    pub scored: usize,
    /// Entries in the class.
    pub total: usize,
}
