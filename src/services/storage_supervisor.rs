use std::{future::Future, sync::Arc, time::Duration};

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{storage::StorageError, trial_store::TrialStore},
    services::sse_events,
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;
const MAX_JITTER_MS: u64 = 250;

/// Connect to the trial store, keep it healthy and fall back to degraded mode
/// while it is unreachable.
///
/// The mirror sync is started whenever a store gets installed and stopped
/// when the store is dropped.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn TrialStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_store(store.clone()).await;
                sse_events::broadcast_system_status(&state, false);
                info!("trial store connected; leaving degraded mode");
                delay = INITIAL_DELAY;

                if let Err(err) = state.sync().start(&state).await {
                    warn!(error = %err, "failed to start mirror sync");
                }

                watch_health(&state, store.as_ref()).await;

                warn!("exhausted trial store reconnect attempts; dropping the store");
                state.sync().stop(&state).await;
                state.clear_store().await;
                sse_events::broadcast_system_status(&state, true);

                sleep(with_jitter(delay)).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "trial store connection attempt failed");
                sleep(with_jitter(delay)).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Poll the store until it stays unreachable after every reconnect attempt.
async fn watch_health(state: &SharedState, store: &dyn TrialStore) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.update_degraded(false).await {
                    info!("trial store healthy again; leaving degraded mode");
                    sse_events::broadcast_system_status(state, false);
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                warn!(error = %err, "trial store health check failed");
                if !reconnect(state, store).await {
                    return;
                }
                if state.update_degraded(false).await {
                    sse_events::broadcast_system_status(state, false);
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
        }
    }
}

async fn reconnect(state: &SharedState, store: &dyn TrialStore) -> bool {
    let mut reconnect_delay = INITIAL_DELAY;

    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "trial store reconnection succeeded");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(
                        attempt, error = %err,
                        "trial store reconnect first attempt failed; entering degraded mode"
                    );
                    if state.update_degraded(true).await {
                        sse_events::broadcast_system_status(state, true);
                    }
                } else {
                    warn!(attempt, error = %err, "trial store reconnect attempt failed");
                }
                sleep(with_jitter(reconnect_delay)).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }

    false
}

fn with_jitter(delay: Duration) -> Duration {
    delay + Duration::from_millis(rand::rng().random_range(0..=MAX_JITTER_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::trial_store::memory::MemoryTrialStore,
        state::AppState,
    };

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..32 {
            let delay = with_jitter(INITIAL_DELAY);
            assert!(delay >= INITIAL_DELAY);
            assert!(delay <= INITIAL_DELAY + Duration::from_millis(MAX_JITTER_MS));
        }
    }

    #[tokio::test]
    async fn connecting_installs_the_store_and_starts_the_sync() {
        let state = AppState::new(AppConfig::default());
        let mut degraded = state.degraded_watcher();
        let store = MemoryTrialStore::new();

        let supervisor = tokio::spawn(run(state.clone(), move || {
            let store = store.clone();
            async move { Ok(Arc::new(store) as Arc<dyn TrialStore>) }
        }));

        tokio::time::timeout(Duration::from_secs(2), degraded.wait_for(|value| !*value))
            .await
            .unwrap()
            .unwrap();
        assert!(state.store().await.is_some());

        for _ in 0..100 {
            if state.sync().is_running().await {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(state.sync().is_running().await);

        supervisor.abort();
    }
}
