//! In-process trial store. It backs the test-suite and offline demos, runs the
//! ranking procedure locally, mirrors the remote lock guard and can simulate
//! a read replica that lags behind the primary.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use futures::{
    StreamExt,
    future::{BoxFuture, ready},
    stream::BoxStream,
};
use indexmap::IndexMap;
use time::OffsetDateTime;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;

use crate::dao::{
    models::{
        ChangeEvent, ChangeFilter, ChangeKind, ChangeRecord, ClassEntity, ClassId, ClassPatch,
        EntryEntity, EntryId, EntryPatch, PlacementRequest, ShowEntity, ShowId, Table,
        TrialEntity, TrialId,
    },
    ranking::{RankingRule, rank_entries},
    storage::{StorageError, StorageResult},
    trial_store::TrialStore,
};

/// Counter key of [`TrialStore::find_entry`].
pub const OP_FIND_ENTRY: &str = "find_entry";
/// Counter key of [`TrialStore::list_class_entries`].
pub const OP_LIST_CLASS_ENTRIES: &str = "list_class_entries";
/// Counter key of [`TrialStore::find_class_id_for_entry`].
pub const OP_FIND_CLASS_ID_FOR_ENTRY: &str = "find_class_id_for_entry";
/// Counter key of [`TrialStore::update_entry`].
pub const OP_UPDATE_ENTRY: &str = "update_entry";
/// Counter key of [`TrialStore::find_class`].
pub const OP_FIND_CLASS: &str = "find_class";
/// Counter key of [`TrialStore::update_class`].
pub const OP_UPDATE_CLASS: &str = "update_class";
/// Counter key of [`TrialStore::find_trial`].
pub const OP_FIND_TRIAL: &str = "find_trial";
/// Counter key of [`TrialStore::find_show`].
pub const OP_FIND_SHOW: &str = "find_show";
/// Counter key of [`TrialStore::unlock_entry`].
pub const OP_UNLOCK_ENTRY: &str = "unlock_entry";
/// Counter key of [`TrialStore::recalculate_placements`].
pub const OP_RECALCULATE_PLACEMENTS: &str = "recalculate_placements";
/// Counter key of [`TrialStore::health_check`].
pub const OP_HEALTH_CHECK: &str = "health_check";

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default)]
struct Tables {
    entries: IndexMap<EntryId, EntryEntity>,
    classes: IndexMap<ClassId, ClassEntity>,
    trials: IndexMap<TrialId, TrialEntity>,
    shows: IndexMap<ShowId, ShowEntity>,
}

struct MemoryInner {
    primary: RwLock<Tables>,
    replica: RwLock<Tables>,
    lagging: AtomicBool,
    calls: DashMap<&'static str, usize>,
    armed_failures: DashMap<&'static str, usize>,
    changes: broadcast::Sender<ChangeEvent>,
}

/// Trial store living entirely in memory.
#[derive(Clone)]
pub struct MemoryTrialStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryTrialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTrialStore {
    /// Create an empty store whose reads always see the latest writes.
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                primary: RwLock::new(Tables::default()),
                replica: RwLock::new(Tables::default()),
                lagging: AtomicBool::new(false),
                calls: DashMap::new(),
                armed_failures: DashMap::new(),
                changes,
            }),
        }
    }

    /// Serve reads from a replica that only catches up on [`Self::sync_replica`].
    pub async fn enable_replica_lag(&self) {
        self.sync_replica().await;
        self.inner.lagging.store(true, Ordering::SeqCst);
    }

    /// Let the lagging replica catch up with the primary.
    pub async fn sync_replica(&self) {
        let snapshot = self.inner.primary.read().await.clone();
        *self.inner.replica.write().await = snapshot;
    }

    /// Number of times an operation reached the store.
    pub fn calls(&self, op: &str) -> usize {
        self.inner.calls.get(op).map(|count| *count).unwrap_or(0)
    }

    /// Make the next `times` invocations of `op` fail.
    pub fn fail_next(&self, op: &'static str, times: usize) {
        self.inner.armed_failures.insert(op, times);
    }

    /// Seed a show on the primary and the replica.
    pub async fn insert_show(&self, show: ShowEntity) {
        self.seed(|tables| {
            tables.shows.insert(show.id, show.clone());
        })
        .await;
    }

    /// Seed a trial on the primary and the replica.
    pub async fn insert_trial(&self, trial: TrialEntity) {
        self.seed(|tables| {
            tables.trials.insert(trial.id, trial.clone());
        })
        .await;
    }

    /// Seed a class on the primary and the replica.
    pub async fn insert_class(&self, class: ClassEntity) {
        self.seed(|tables| {
            tables.classes.insert(class.id, class.clone());
        })
        .await;
    }

    /// Seed an entry on the primary and the replica.
    pub async fn insert_entry(&self, entry: EntryEntity) {
        self.seed(|tables| {
            tables.entries.insert(entry.id, entry.clone());
        })
        .await;
    }

    /// Primary copy of an entry, bypassing the replica.
    pub async fn entry(&self, id: EntryId) -> Option<EntryEntity> {
        self.inner.primary.read().await.entries.get(&id).cloned()
    }

    /// Primary copy of a class, bypassing the replica.
    pub async fn class(&self, id: ClassId) -> Option<ClassEntity> {
        self.inner.primary.read().await.classes.get(&id).cloned()
    }

    async fn seed<F>(&self, mut apply: F)
    where
        F: FnMut(&mut Tables),
    {
        apply(&mut *self.inner.primary.write().await);
        apply(&mut *self.inner.replica.write().await);
    }

    fn enter(&self, op: &'static str) -> StorageResult<()> {
        *self.inner.calls.entry(op).or_insert(0) += 1;

        let armed = self
            .inner
            .armed_failures
            .get_mut(op)
            .map(|mut remaining| {
                if *remaining == 0 {
                    return false;
                }
                *remaining -= 1;
                true
            })
            .unwrap_or(false);

        if armed {
            Err(StorageError::rejected(format!("injected failure for `{op}`")))
        } else {
            Ok(())
        }
    }

    async fn read<T, F>(&self, read: F) -> T
    where
        F: FnOnce(&Tables) -> T,
    {
        if self.inner.lagging.load(Ordering::SeqCst) {
            read(&*self.inner.replica.read().await)
        } else {
            read(&*self.inner.primary.read().await)
        }
    }

    fn publish(&self, kind: ChangeKind, record: ChangeRecord) {
        let _ = self.inner.changes.send(ChangeEvent { kind, record });
    }
}

impl TrialStore for MemoryTrialStore {
    fn find_entry(&self, id: EntryId) -> BoxFuture<'static, StorageResult<Option<EntryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.enter(OP_FIND_ENTRY)?;
            Ok(store.read(|tables| tables.entries.get(&id).cloned()).await)
        })
    }

    fn list_class_entries(
        &self,
        class_id: ClassId,
    ) -> BoxFuture<'static, StorageResult<Vec<EntryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.enter(OP_LIST_CLASS_ENTRIES)?;
            Ok(store
                .read(|tables| {
                    tables
                        .entries
                        .values()
                        .filter(|entry| entry.class_id == class_id)
                        .cloned()
                        .collect()
                })
                .await)
        })
    }

    fn find_class_id_for_entry(
        &self,
        entry_id: EntryId,
    ) -> BoxFuture<'static, StorageResult<Option<ClassId>>> {
        let store = self.clone();
        Box::pin(async move {
            store.enter(OP_FIND_CLASS_ID_FOR_ENTRY)?;
            Ok(store
                .read(|tables| tables.entries.get(&entry_id).map(|entry| entry.class_id))
                .await)
        })
    }

    fn update_entry(
        &self,
        id: EntryId,
        patch: EntryPatch,
    ) -> BoxFuture<'static, StorageResult<EntryEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store.enter(OP_UPDATE_ENTRY)?;

            let updated = {
                let mut tables = store.inner.primary.write().await;
                let entry = tables
                    .entries
                    .get_mut(&id)
                    .ok_or(StorageError::NotFound { table: "entries", id })?;

                if entry.is_locked && patch.touches_protected_fields() {
                    return Err(StorageError::rejected(format!(
                        "entry `{id}` is locked; unlock it before rewriting its score"
                    )));
                }

                patch.apply_to(entry);
                if patch.is_scored == Some(true) {
                    entry.is_locked = true;
                }
                entry.updated_at = Some(OffsetDateTime::now_utc());
                entry.clone()
            };

            store.publish(ChangeKind::Update, ChangeRecord::Entry(updated.clone()));
            Ok(updated)
        })
    }

    fn find_class(&self, id: ClassId) -> BoxFuture<'static, StorageResult<Option<ClassEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.enter(OP_FIND_CLASS)?;
            Ok(store.read(|tables| tables.classes.get(&id).cloned()).await)
        })
    }

    fn update_class(
        &self,
        id: ClassId,
        patch: ClassPatch,
    ) -> BoxFuture<'static, StorageResult<ClassEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store.enter(OP_UPDATE_CLASS)?;

            let updated = {
                let mut tables = store.inner.primary.write().await;
                let class = tables
                    .classes
                    .get_mut(&id)
                    .ok_or(StorageError::NotFound { table: "classes", id })?;
                patch.apply_to(class);
                class.updated_at = Some(OffsetDateTime::now_utc());
                class.clone()
            };

            store.publish(ChangeKind::Update, ChangeRecord::Class(updated.clone()));
            Ok(updated)
        })
    }

    fn find_trial(&self, id: TrialId) -> BoxFuture<'static, StorageResult<Option<TrialEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.enter(OP_FIND_TRIAL)?;
            Ok(store.read(|tables| tables.trials.get(&id).cloned()).await)
        })
    }

    fn find_show(&self, id: ShowId) -> BoxFuture<'static, StorageResult<Option<ShowEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.enter(OP_FIND_SHOW)?;
            Ok(store.read(|tables| tables.shows.get(&id).cloned()).await)
        })
    }

    fn unlock_entry(&self, id: EntryId) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.enter(OP_UNLOCK_ENTRY)?;
            let mut tables = store.inner.primary.write().await;
            let entry = tables
                .entries
                .get_mut(&id)
                .ok_or(StorageError::NotFound { table: "entries", id })?;
            entry.is_locked = false;
            Ok(())
        })
    }

    fn recalculate_placements(
        &self,
        request: PlacementRequest,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.enter(OP_RECALCULATE_PLACEMENTS)?;

            let rule = RankingRule::for_show(request.is_nationals);
            let mut changed = Vec::new();
            {
                let mut tables = store.inner.primary.write().await;
                let now = OffsetDateTime::now_utc();

                for class_id in &request.class_ids {
                    let placements = rank_entries(
                        tables
                            .entries
                            .values()
                            .filter(|entry| entry.class_id == *class_id),
                        rule,
                    );

                    for (entry_id, placement) in placements {
                        if let Some(entry) = tables.entries.get_mut(&entry_id) {
                            if entry.final_placement != placement {
                                entry.final_placement = placement;
                                entry.updated_at = Some(now);
                                changed.push(entry.clone());
                            }
                        }
                    }
                }
            }

            for entry in changed {
                store.publish(ChangeKind::Update, ChangeRecord::Entry(entry));
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        table: Table,
        filter: ChangeFilter,
    ) -> BoxStream<'static, StorageResult<ChangeEvent>> {
        let receiver = self.inner.changes.subscribe();
        BroadcastStream::new(receiver)
            .filter_map(move |item| {
                ready(match item {
                    Ok(event) if event.record.table() == table && filter.matches(&event.record) => {
                        Some(Ok(event))
                    }
                    // Lagged receivers skip the missed events; the next full sync reconciles.
                    _ => None,
                })
            })
            .boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.enter(OP_HEALTH_CHECK) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::entry_status::ResultStatus;

    async fn seeded() -> MemoryTrialStore {
        let store = MemoryTrialStore::new();
        store.insert_class(ClassEntity::new(1, 1, "Interior", "Novice A")).await;
        for id in 1..=3 {
            store.insert_entry(EntryEntity::new(id, 1, 100 + id as i32)).await;
        }
        store
    }

    fn scored_patch(faults: i32, time: f64) -> EntryPatch {
        EntryPatch {
            is_scored: Some(true),
            result_status: Some(ResultStatus::Qualified),
            fault_count: Some(faults),
            search_time_seconds: Some(time),
            ..EntryPatch::default()
        }
    }

    #[tokio::test]
    async fn scoring_locks_the_entry_until_unlocked() {
        let store = seeded().await;
        let scored = store.update_entry(1, scored_patch(0, 30.0)).await.unwrap();
        assert!(scored.is_locked);

        let err = store.update_entry(1, scored_patch(1, 31.0)).await.unwrap_err();
        assert!(matches!(err, StorageError::Rejected { .. }));

        store.unlock_entry(1).await.unwrap();
        let rescored = store.update_entry(1, scored_patch(1, 31.0)).await.unwrap();
        assert_eq!(rescored.fault_count, 1);
    }

    #[tokio::test]
    async fn lagging_replica_hides_writes_until_synced() {
        let store = seeded().await;
        store.enable_replica_lag().await;

        store.update_entry(2, scored_patch(0, 20.0)).await.unwrap();
        let stale = store.find_entry(2).await.unwrap().unwrap();
        assert!(!stale.is_scored);

        store.sync_replica().await;
        let fresh = store.find_entry(2).await.unwrap().unwrap();
        assert!(fresh.is_scored);
    }

    #[tokio::test]
    async fn placements_follow_the_ranking_rule() {
        let store = seeded().await;
        store.update_entry(1, scored_patch(1, 20.0)).await.unwrap();
        store.update_entry(2, scored_patch(0, 50.0)).await.unwrap();
        store.update_entry(3, scored_patch(0, 0.0)).await.unwrap();

        store
            .recalculate_placements(PlacementRequest {
                class_ids: vec![1],
                license_key: "L-1".into(),
                is_nationals: false,
            })
            .await
            .unwrap();

        assert_eq!(store.entry(2).await.unwrap().final_placement, 1);
        assert_eq!(store.entry(3).await.unwrap().final_placement, 2);
        assert_eq!(store.entry(1).await.unwrap().final_placement, 3);
    }

    #[tokio::test]
    async fn armed_failures_are_consumed() {
        let store = seeded().await;
        store.fail_next(OP_UPDATE_CLASS, 1);

        let patch = ClassPatch::default();
        assert!(store.update_class(1, patch.clone()).await.is_err());
        assert!(store.update_class(1, patch).await.is_ok());
        assert_eq!(store.calls(OP_UPDATE_CLASS), 2);
    }

    #[tokio::test]
    async fn subscriptions_only_deliver_matching_rows() {
        let store = seeded().await;
        store.insert_entry(EntryEntity::new(9, 2, 900)).await;
        let mut changes = store.subscribe(Table::Entries, ChangeFilter::eq("class_id", 2));

        store.update_entry(1, EntryPatch::default()).await.unwrap();
        store.update_entry(9, EntryPatch::default()).await.unwrap();

        let event = changes.next().await.unwrap().unwrap();
        match event.record {
            ChangeRecord::Entry(entry) => assert_eq!(entry.id, 9),
            other => panic!("unexpected record {other:?}"),
        }
    }
}
