/// Class status resolution from scored entry counts.
pub mod class_status;
/// Entry status machine: ring moves, check-in and scoring transitions.
pub mod entry_status;
/// Client-local mirror of remote rows.
pub mod mirror;
mod sse;
/// Tracked fire-and-forget background work.
pub mod tasks;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{models::ClassId, trial_store::TrialStore},
    error::ServiceError,
    services::sync_service::SyncManager,
};

pub use self::sse::SseHub;
use self::{mirror::LocalMirror, tasks::TaskRegistry};

/// Shared handle on the application state.
pub type SharedState = Arc<AppState>;

const PUBLIC_SSE_CAPACITY: usize = 64;

/// Central application state: the remote store handle, the local mirror and
/// the background machinery around them.
pub struct AppState {
    store: RwLock<Option<Arc<dyn TrialStore>>>,
    degraded: watch::Sender<bool>,
    mirror: Arc<LocalMirror>,
    tasks: TaskRegistry,
    sse: SseHub,
    sync: SyncManager,
    class_locks: DashMap<ClassId, Arc<Mutex<()>>>,
    config: AppConfig,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            degraded: degraded_tx,
            mirror: Arc::new(LocalMirror::new()),
            tasks: TaskRegistry::new(config.task_failure_history),
            sse: SseHub::new(PUBLIC_SSE_CAPACITY),
            sync: SyncManager::new(),
            class_locks: DashMap::new(),
            config,
        })
    }

    /// Build a state with `store` already installed.
    pub async fn with_store(config: AppConfig, store: Arc<dyn TrialStore>) -> SharedState {
        let state = Self::new(config);
        state.install_store(store).await;
        state
    }

    /// Obtain a handle to the current trial store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn TrialStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Current trial store or [`ServiceError::Degraded`].
    pub async fn require_store(&self) -> Result<Arc<dyn TrialStore>, ServiceError> {
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new trial store implementation and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn TrialStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current trial store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    ///
    /// Returns whether the flag flipped.
    pub async fn update_degraded(&self, value: bool) -> bool {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// Client-local mirror of entry and class rows.
    pub fn mirror(&self) -> &Arc<LocalMirror> {
        &self.mirror
    }

    /// Registry running fire-and-forget work.
    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Broadcast hub used for the public SSE stream.
    pub fn public_sse(&self) -> &SseHub {
        &self.sse
    }

    /// Service keeping the mirror in sync with the remote store.
    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    /// Lock held while the status of `class_id` is evaluated and written.
    pub fn class_lock(&self, class_id: ClassId) -> Arc<Mutex<()>> {
        Arc::clone(&self.class_locks.entry(class_id).or_default())
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
