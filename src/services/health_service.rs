use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report liveness while logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    let sync_running = state.sync().is_running().await;
    let failures = state.tasks().failure_count();

    if state.is_degraded().await {
        HealthResponse::degraded(sync_running, failures)
    } else {
        HealthResponse::ok(sync_running, failures)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::trial_store::memory::MemoryTrialStore, state::AppState,
    };

    #[tokio::test]
    async fn reports_degraded_without_a_store() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, "degraded");
    }

    #[tokio::test]
    async fn reports_ok_with_a_store() {
        let state =
            AppState::with_store(AppConfig::default(), Arc::new(MemoryTrialStore::new())).await;
        let health = health_status(&state).await;
        assert_eq!(health.status, "ok");
        assert!(!health.sync_running);
    }
}
