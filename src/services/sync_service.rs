//! Mirror synchronisation: loads watched classes into the local mirror,
//! follows remote change subscriptions and flushes dirty mirror rows.

use std::sync::Arc;

use dashmap::DashSet;
use futures::{StreamExt, stream::BoxStream};
use tokio::sync::Mutex;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{
            ChangeEvent, ChangeFilter, ChangeKind, ChangeRecord, ClassId, ClassPatch, EntryPatch,
            Table,
        },
        storage::StorageResult,
        trial_store::TrialStore,
    },
    error::ServiceError,
    services::sse_events,
    state::{SharedState, mirror::MergeOutcome},
};

/// Counters describing one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Dirty rows pushed to the remote store.
    pub flushed: usize,
    /// Rows whose flush failed; they stay dirty.
    pub failed: Vec<i64>,
    /// Remote rows merged into the mirror.
    pub refreshed: usize,
}

struct RunningSync {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Owns the mirror lifecycle. Constructed once and held by the application state.
pub struct SyncManager {
    running: Mutex<Option<RunningSync>>,
    watched: DashSet<ClassId>,
    loaded: DashSet<ClassId>,
}

impl Default for SyncManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncManager {
    /// Stopped manager watching no class.
    pub fn new() -> Self {
        Self {
            running: Mutex::new(None),
            watched: DashSet::new(),
            loaded: DashSet::new(),
        }
    }

    /// Whether the subscriptions are running.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Watched classes in ascending id order.
    pub fn watched_classes(&self) -> Vec<ClassId> {
        let mut classes = self.watched.iter().map(|id| *id).collect::<Vec<_>>();
        classes.sort_unstable();
        classes
    }

    /// Whether every entry of the class has been loaded into the mirror.
    pub fn is_mirrored(&self, class_id: ClassId) -> bool {
        self.loaded.contains(&class_id)
    }

    /// Register the mirror tables, load the watched classes and follow their changes.
    pub async fn start(&self, state: &SharedState) -> Result<(), ServiceError> {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            debug!("mirror sync already running");
            return Ok(());
        }

        let store = state.require_store().await?;
        state.mirror().register(Table::Entries).await;
        state.mirror().register(Table::Classes).await;

        for class_id in &state.config().watch_classes {
            self.watched.insert(*class_id);
        }

        let running = RunningSync {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };
        for class_id in self.watched_classes() {
            self.follow_class(state, &store, &running, class_id).await;
        }

        info!(watched = self.watched.len(), "mirror sync started");
        *guard = Some(running);
        Ok(())
    }

    /// Cancel the subscriptions and drop the mirror tables.
    pub async fn stop(&self, state: &SharedState) {
        let running = self.running.lock().await.take();
        let Some(running) = running else {
            return;
        };

        running.cancel.cancel();
        running.tracker.close();
        running.tracker.wait().await;

        self.loaded.clear();
        state.mirror().unregister(Table::Entries).await;
        state.mirror().unregister(Table::Classes).await;
        info!("mirror sync stopped");
    }

    /// Add a class to the mirror. Returns whether it was not watched before.
    pub async fn watch_class(
        &self,
        state: &SharedState,
        class_id: ClassId,
    ) -> Result<bool, ServiceError> {
        let newly_watched = self.watched.insert(class_id);

        let guard = self.running.lock().await;
        if let Some(running) = guard.as_ref() {
            let store = state.require_store().await?;
            if newly_watched {
                self.follow_class(state, &store, running, class_id).await;
            } else if !self.is_mirrored(class_id) {
                self.load_class(state, &store, class_id).await?;
                self.loaded.insert(class_id);
            }
        }

        Ok(newly_watched)
    }

    /// Push dirty rows of `table` to the remote store, then refresh the watched classes.
    ///
    /// Does nothing while the sync is stopped.
    pub async fn trigger(
        &self,
        state: &SharedState,
        table: Table,
    ) -> Result<SyncReport, ServiceError> {
        if !self.is_running().await {
            return Ok(SyncReport::default());
        }

        let store = state.require_store().await?;
        let mut report = SyncReport::default();

        match table {
            Table::Entries => flush_entries(state, &store, &mut report).await,
            Table::Classes => flush_classes(state, &store, &mut report).await,
        }

        for class_id in self.watched_classes() {
            match self.load_class(state, &store, class_id).await {
                Ok(merged) => {
                    report.refreshed += merged;
                    self.loaded.insert(class_id);
                }
                Err(err) => warn!(class_id, error = %err, "failed to refresh mirrored class"),
            }
        }

        if !report.failed.is_empty() {
            warn!(table = %table, failed = ?report.failed, "some dirty rows could not be flushed");
        }
        debug!(
            table = %table,
            flushed = report.flushed,
            refreshed = report.refreshed,
            "sync pass finished"
        );
        Ok(report)
    }

    async fn follow_class(
        &self,
        state: &SharedState,
        store: &Arc<dyn TrialStore>,
        running: &RunningSync,
        class_id: ClassId,
    ) {
        // Subscribe before loading so changes racing the initial load are merged afterwards.
        spawn_subscription(
            state,
            running,
            format!("entries:{class_id}"),
            store.subscribe(Table::Entries, ChangeFilter::eq("class_id", class_id)),
        );
        spawn_subscription(
            state,
            running,
            format!("classes:{class_id}"),
            store.subscribe(Table::Classes, ChangeFilter::eq("id", class_id)),
        );

        match self.load_class(state, store, class_id).await {
            Ok(merged) => {
                self.loaded.insert(class_id);
                debug!(class_id, merged, "class loaded into mirror");
            }
            Err(err) => warn!(class_id, error = %err, "failed to load class into mirror"),
        }
    }

    /// Merge the remote roster and class row into the mirror.
    async fn load_class(
        &self,
        state: &SharedState,
        store: &Arc<dyn TrialStore>,
        class_id: ClassId,
    ) -> Result<usize, ServiceError> {
        let entries = store.list_class_entries(class_id).await?;
        let class = store.find_class(class_id).await?;
        let mut merged = 0;

        if let Some(table) = state.mirror().entries().await {
            for entry in entries {
                if is_merged(table.apply_remote(entry)) {
                    merged += 1;
                }
            }
        }
        if let (Some(class), Some(table)) = (class, state.mirror().classes().await) {
            if is_merged(table.apply_remote(class)) {
                merged += 1;
            }
        }

        Ok(merged)
    }
}

fn is_merged(outcome: MergeOutcome) -> bool {
    matches!(outcome, MergeOutcome::Inserted | MergeOutcome::Replaced)
}

fn spawn_subscription(
    state: &SharedState,
    running: &RunningSync,
    label: String,
    mut changes: BoxStream<'static, StorageResult<ChangeEvent>>,
) {
    let cancel = running.cancel.clone();
    let state = state.clone();

    running.tracker.spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = changes.next() => match next {
                    Some(Ok(event)) => apply_change(&state, event).await,
                    Some(Err(err)) => {
                        warn!(subscription = %label, error = %err, "change subscription error");
                    }
                    None => {
                        debug!(subscription = %label, "change subscription ended");
                        break;
                    }
                },
            }
        }
    });
}

async fn apply_change(state: &SharedState, event: ChangeEvent) {
    let mirror = state.mirror();
    match (event.kind, event.record) {
        (ChangeKind::Delete, ChangeRecord::Entry(entry)) => {
            if let Some(table) = mirror.entries().await {
                table.remove(entry.id);
            }
        }
        (ChangeKind::Delete, ChangeRecord::Class(class)) => {
            if let Some(table) = mirror.classes().await {
                table.remove(class.id);
            }
        }
        (_, ChangeRecord::Entry(entry)) => {
            if let Some(table) = mirror.entries().await {
                if is_merged(table.apply_remote(entry.clone())) {
                    sse_events::broadcast_entry_updated(state, &entry);
                }
            }
        }
        (_, ChangeRecord::Class(class)) => {
            if let Some(table) = mirror.classes().await {
                table.apply_remote(class);
            }
        }
    }
}

async fn flush_entries(state: &SharedState, store: &Arc<dyn TrialStore>, report: &mut SyncReport) {
    let Some(table) = state.mirror().entries().await else {
        return;
    };

    for entry in table.dirty() {
        match store
            .update_entry(entry.id, EntryPatch::from_entity(&entry))
            .await
        {
            Ok(updated) => {
                table.set(updated.id, updated, false);
                report.flushed += 1;
            }
            Err(err) => {
                warn!(entry_id = entry.id, error = %err, "failed to flush dirty entry");
                report.failed.push(entry.id);
            }
        }
    }
}

async fn flush_classes(state: &SharedState, store: &Arc<dyn TrialStore>, report: &mut SyncReport) {
    let Some(table) = state.mirror().classes().await else {
        return;
    };

    for class in table.dirty() {
        let patch = ClassPatch {
            class_status: Some(class.class_status),
            is_scoring_finalized: Some(class.is_scoring_finalized),
            updated_at: None,
        };
        match store.update_class(class.id, patch).await {
            Ok(updated) => {
                table.set(updated.id, updated, false);
                report.flushed += 1;
            }
            Err(err) => {
                warn!(class_id = class.id, error = %err, "failed to flush dirty class");
                report.failed.push(class.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::{ClassEntity, EntryEntity},
            trial_store::memory::{MemoryTrialStore, OP_UPDATE_ENTRY},
        },
        state::{AppState, class_status::ClassStatus},
    };

    async fn setup(watch: Vec<ClassId>) -> (SharedState, MemoryTrialStore) {
        let store = MemoryTrialStore::new();
        store.insert_class(ClassEntity::new(1, 1, "Interior", "Novice A")).await;
        store.insert_entry(EntryEntity::new(10, 1, 101)).await;
        store.insert_entry(EntryEntity::new(11, 1, 102)).await;

        let config = AppConfig {
            watch_classes: watch,
            ..AppConfig::default()
        };
        let state = AppState::with_store(config, Arc::new(store.clone())).await;
        (state, store)
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn start_loads_watched_classes_and_stop_drops_the_mirror() {
        let (state, _store) = setup(vec![1]).await;

        state.sync().start(&state).await.unwrap();
        assert!(state.sync().is_mirrored(1));
        let entries = state.mirror().entries().await.unwrap();
        assert_eq!(entries.entries_for_class(1).len(), 2);
        assert!(state.mirror().class(1).await.is_some());

        state.sync().stop(&state).await;
        assert!(!state.sync().is_running().await);
        assert!(!state.sync().is_mirrored(1));
        assert!(state.mirror().entries().await.is_none());
    }

    #[tokio::test]
    async fn remote_changes_reach_the_mirror() {
        let (state, store) = setup(vec![1]).await;
        state.sync().start(&state).await.unwrap();

        store
            .update_class(
                1,
                ClassPatch {
                    class_status: Some(ClassStatus::Briefing),
                    ..ClassPatch::default()
                },
            )
            .await
            .unwrap();

        eventually(|| {
            let state = state.clone();
            async move {
                state
                    .mirror()
                    .class(1)
                    .await
                    .is_some_and(|class| class.class_status == ClassStatus::Briefing)
            }
        })
        .await;

        state.sync().stop(&state).await;
    }

    #[tokio::test]
    async fn watching_a_class_while_running_loads_it() {
        let (state, store) = setup(Vec::new()).await;
        store.insert_class(ClassEntity::new(2, 1, "Exterior", "Novice A")).await;
        store.insert_entry(EntryEntity::new(20, 2, 201)).await;

        state.sync().start(&state).await.unwrap();
        assert!(!state.sync().is_mirrored(2));

        assert!(state.sync().watch_class(&state, 2).await.unwrap());
        assert!(!state.sync().watch_class(&state, 2).await.unwrap());
        assert!(state.sync().is_mirrored(2));
        assert_eq!(state.sync().watched_classes(), vec![2]);

        state.sync().stop(&state).await;
    }

    #[tokio::test]
    async fn trigger_flushes_dirty_rows() {
        let (state, store) = setup(vec![1]).await;
        state.sync().start(&state).await.unwrap();

        let table = state.mirror().entries().await.unwrap();
        let mut offline = table.get(10).unwrap().record;
        offline.entry_status = crate::state::entry_status::EntryStatus::CheckedIn;
        table.set(10, offline, true);

        let report = state.sync().trigger(&state, Table::Entries).await.unwrap();
        assert_eq!(report.flushed, 1);
        assert!(report.failed.is_empty());
        assert!(table.dirty().is_empty());
        assert_eq!(store.calls(OP_UPDATE_ENTRY), 1);

        state.sync().stop(&state).await;
    }

    #[tokio::test]
    async fn trigger_is_a_noop_while_stopped() {
        let (state, store) = setup(vec![1]).await;
        let report = state.sync().trigger(&state, Table::Entries).await.unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(store.calls(OP_UPDATE_ENTRY), 0);
    }
}
