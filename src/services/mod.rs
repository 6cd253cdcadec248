use tracing::{debug, warn};

use crate::state::mirror::MirrorError;

/// Class completion evaluation.
pub mod completion_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Ring, check-in, manual completion and reset operations.
pub mod entry_service;
/// Health check service.
pub mod health_service;
/// Placement recalculation trigger.
pub mod placement_service;
/// Score submission flow.
pub mod scoring_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Remote store connection supervisor.
pub mod storage_supervisor;
/// Local mirror synchronisation.
pub mod sync_service;

/// Log a failed mirror write-through. The remote write already succeeded.
pub(crate) fn report_mirror_error(err: &MirrorError) {
    match err {
        MirrorError::TableNotRegistered(table) => {
            debug!(table = %table, "mirror not running; write-through skipped")
        }
        other => warn!(error = %other, "failed to update local mirror"),
    }
}
