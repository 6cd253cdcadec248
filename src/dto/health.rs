use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Whether the mirror sync is running.
    pub sync_running: bool,
    /// Background tasks that failed since startup.
    pub background_failures: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(sync_running: bool, background_failures: usize) -> Self {
        Self {
            status: "ok".to_string(),
            sync_running,
            background_failures,
        }
    }

    /// Create a health response indicating the system is in degraded mode.
    pub fn degraded(sync_running: bool, background_failures: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            sync_running,
            background_failures,
        }
    }
}
