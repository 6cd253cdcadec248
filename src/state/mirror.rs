//! Client-local mirror of remote `entries` and `classes` rows.
//!
//! The mirror is written through after every successful remote mutation and
//! is read first by the completion evaluator, so this client never observes a
//! lagging replica's view of its own writes.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::dao::models::{ClassEntity, ClassId, EntryEntity, EntryId, Table};

/// Failures of mirror updates. Callers log them; they never fail an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorError {
    /// The sync manager has not registered this table.
    #[error("mirror table `{0}` is not registered")]
    TableNotRegistered(Table),
    /// The row is not in the mirror.
    #[error("{table} row `{id}` is not cached")]
    NotCached {
        /// Mirrored table.
        table: Table,
        /// Missing row id.
        id: i64,
    },
}

/// Rows that can live in the mirror.
pub trait MirrorRecord: Clone + Send + Sync + 'static {
    /// Primary key of the row.
    fn key(&self) -> i64;
    /// Remote modification time, when known.
    fn updated_at(&self) -> Option<OffsetDateTime>;
}

impl MirrorRecord for EntryEntity {
    fn key(&self) -> i64 {
        self.id
    }

    fn updated_at(&self) -> Option<OffsetDateTime> {
        self.updated_at
    }
}

impl MirrorRecord for ClassEntity {
    fn key(&self) -> i64 {
        self.id
    }

    fn updated_at(&self) -> Option<OffsetDateTime> {
        self.updated_at
    }
}

/// A mirrored row and its local bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord<T> {
    /// Mirrored row.
    pub record: T,
    /// Set when the row carries local changes the remote has not seen yet.
    pub is_dirty: bool,
    /// When the row was last written locally.
    pub cached_at: OffsetDateTime,
}

/// Outcome of merging a row received from the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The row was not cached yet.
    Inserted,
    /// The incoming row replaced the cached one.
    Replaced,
    /// The cached row has unflushed local changes.
    KeptDirty,
    /// The cached row is newer than the incoming one.
    KeptNewer,
}

/// One mirrored table.
pub struct MirrorTable<T> {
    table: Table,
    rows: DashMap<i64, CachedRecord<T>>,
}

impl<T: MirrorRecord> MirrorTable<T> {
    fn new(table: Table) -> Self {
        Self {
            table,
            rows: DashMap::new(),
        }
    }

    /// Remote table this mirror follows.
    pub fn table(&self) -> Table {
        self.table
    }

    /// Cached row by id.
    pub fn get(&self, id: i64) -> Option<CachedRecord<T>> {
        self.rows.get(&id).map(|row| row.value().clone())
    }

    /// Insert or overwrite a row.
    pub fn set(&self, id: i64, record: T, is_dirty: bool) {
        self.rows.insert(
            id,
            CachedRecord {
                record,
                is_dirty,
                cached_at: OffsetDateTime::now_utc(),
            },
        );
    }

    /// Every cached row.
    pub fn get_all(&self) -> Vec<CachedRecord<T>> {
        self.rows.iter().map(|row| row.value().clone()).collect()
    }

    /// Rows still waiting to be pushed to the remote store.
    pub fn dirty(&self) -> Vec<T> {
        self.rows
            .iter()
            .filter(|row| row.is_dirty)
            .map(|row| row.record.clone())
            .collect()
    }

    /// Flag a row as pushed to the remote store.
    pub fn mark_clean(&self, id: i64) -> Result<(), MirrorError> {
        let mut row = self.rows.get_mut(&id).ok_or(MirrorError::NotCached {
            table: self.table,
            id,
        })?;
        row.is_dirty = false;
        Ok(())
    }

    /// Drop a row, returning it.
    pub fn remove(&self, id: i64) -> Option<T> {
        self.rows.remove(&id).map(|(_, cached)| cached.record)
    }

    /// Number of cached rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no row is cached.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Merge a row coming from the remote side without losing local state.
    pub fn apply_remote(&self, record: T) -> MergeOutcome {
        let id = record.key();
        let existing = self
            .rows
            .get(&id)
            .map(|cached| (cached.is_dirty, cached.record.updated_at()));

        match existing {
            None => {
                self.set(id, record, false);
                MergeOutcome::Inserted
            }
            Some((true, _)) => MergeOutcome::KeptDirty,
            Some((false, current)) => {
                let stale = match (current, record.updated_at()) {
                    (Some(current), Some(incoming)) => incoming < current,
                    (Some(_), None) => true,
                    _ => false,
                };
                if stale {
                    MergeOutcome::KeptNewer
                } else {
                    self.set(id, record, false);
                    MergeOutcome::Replaced
                }
            }
        }
    }
}

impl MirrorTable<EntryEntity> {
    /// Mirrored entries of one class.
    pub fn entries_for_class(&self, class_id: ClassId) -> Vec<EntryEntity> {
        let mut entries = self
            .rows
            .iter()
            .filter(|row| row.record.class_id == class_id)
            .map(|row| row.record.clone())
            .collect::<Vec<_>>();
        entries.sort_by_key(|entry| entry.id);
        entries
    }
}

/// Registry of the mirrored tables. Tables exist only while the sync manager
/// has registered them; unregistered tables force callers back to remote reads.
pub struct LocalMirror {
    entries: RwLock<Option<Arc<MirrorTable<EntryEntity>>>>,
    classes: RwLock<Option<Arc<MirrorTable<ClassEntity>>>>,
}

impl Default for LocalMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalMirror {
    /// Mirror with no registered table.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(None),
            classes: RwLock::new(None),
        }
    }

    /// Register a table, keeping its rows if it is already registered.
    pub async fn register(&self, table: Table) {
        match table {
            Table::Entries => {
                let mut guard = self.entries.write().await;
                guard.get_or_insert_with(|| Arc::new(MirrorTable::new(table)));
            }
            Table::Classes => {
                let mut guard = self.classes.write().await;
                guard.get_or_insert_with(|| Arc::new(MirrorTable::new(table)));
            }
        }
    }

    /// Drop a table and all of its rows.
    pub async fn unregister(&self, table: Table) {
        match table {
            Table::Entries => {
                self.entries.write().await.take();
            }
            Table::Classes => {
                self.classes.write().await.take();
            }
        }
    }

    /// Registered `entries` table.
    pub async fn entries(&self) -> Option<Arc<MirrorTable<EntryEntity>>> {
        self.entries.read().await.as_ref().cloned()
    }

    /// Registered `classes` table.
    pub async fn classes(&self) -> Option<Arc<MirrorTable<ClassEntity>>> {
        self.classes.read().await.as_ref().cloned()
    }

    /// Cached entry, if the table is registered and holds the row.
    pub async fn entry(&self, id: EntryId) -> Option<EntryEntity> {
        self.entries()
            .await
            .and_then(|table| table.get(id))
            .map(|cached| cached.record)
    }

    /// Cached class, if the table is registered and holds the row.
    pub async fn class(&self, id: ClassId) -> Option<ClassEntity> {
        self.classes()
            .await
            .and_then(|table| table.get(id))
            .map(|cached| cached.record)
    }

    /// Write an entry the remote store just accepted.
    pub async fn store_entry(&self, entry: EntryEntity) -> Result<(), MirrorError> {
        let table = self
            .entries()
            .await
            .ok_or(MirrorError::TableNotRegistered(Table::Entries))?;
        table.set(entry.id, entry, false);
        Ok(())
    }

    /// Write a class the remote store just accepted.
    pub async fn store_class(&self, class: ClassEntity) -> Result<(), MirrorError> {
        let table = self
            .classes()
            .await
            .ok_or(MirrorError::TableNotRegistered(Table::Classes))?;
        table.set(class.id, class, false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    fn entry_at(id: EntryId, updated_at: OffsetDateTime) -> EntryEntity {
        let mut entry = EntryEntity::new(id, 1, id as i32);
        entry.updated_at = Some(updated_at);
        entry
    }

    #[tokio::test]
    async fn unregistered_tables_reject_writes() {
        let mirror = LocalMirror::new();
        let err = mirror
            .store_entry(EntryEntity::new(1, 1, 1))
            .await
            .unwrap_err();
        assert_eq!(err, MirrorError::TableNotRegistered(Table::Entries));
        assert!(mirror.entry(1).await.is_none());
    }

    #[tokio::test]
    async fn set_get_and_get_all() {
        let mirror = LocalMirror::new();
        mirror.register(Table::Entries).await;
        let table = mirror.entries().await.unwrap();

        table.set(1, EntryEntity::new(1, 5, 11), false);
        table.set(2, EntryEntity::new(2, 6, 12), true);

        assert_eq!(table.get(1).unwrap().record.class_id, 5);
        assert_eq!(table.get_all().len(), 2);
        assert_eq!(table.dirty().len(), 1);
        assert_eq!(table.entries_for_class(6).len(), 1);

        table.mark_clean(2).unwrap();
        assert!(table.dirty().is_empty());
        assert!(table.mark_clean(3).is_err());
    }

    #[tokio::test]
    async fn register_keeps_existing_rows() {
        let mirror = LocalMirror::new();
        mirror.register(Table::Classes).await;
        mirror
            .store_class(ClassEntity::new(3, 1, "Containers", "Novice A"))
            .await
            .unwrap();
        mirror.register(Table::Classes).await;
        assert!(mirror.class(3).await.is_some());

        mirror.unregister(Table::Classes).await;
        assert!(mirror.classes().await.is_none());
    }

    #[test]
    fn remote_merge_keeps_dirty_and_newer_rows() {
        let table = MirrorTable::<EntryEntity>::new(Table::Entries);
        let now = OffsetDateTime::now_utc();

        assert_eq!(table.apply_remote(entry_at(1, now)), MergeOutcome::Inserted);

        let older = entry_at(1, now - Duration::seconds(5));
        assert_eq!(table.apply_remote(older), MergeOutcome::KeptNewer);

        let newer = entry_at(1, now + Duration::seconds(5));
        assert_eq!(table.apply_remote(newer), MergeOutcome::Replaced);

        let mut local = entry_at(1, now + Duration::seconds(6));
        local.fault_count = 2;
        table.set(1, local, true);
        assert_eq!(
            table.apply_remote(entry_at(1, now + Duration::seconds(30))),
            MergeOutcome::KeptDirty
        );
        assert_eq!(table.get(1).unwrap().record.fault_count, 2);
    }
}
