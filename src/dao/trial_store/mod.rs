/// In-process backend used by tests and offline runs.
pub mod memory;
/// PostgREST backend.
#[cfg(feature = "postgrest-store")]
pub mod postgrest;

use crate::dao::models::{
    ChangeEvent, ChangeFilter, ClassEntity, ClassId, ClassPatch, EntryEntity, EntryId, EntryPatch,
    PlacementRequest, ShowEntity, ShowId, Table, TrialEntity, TrialId,
};
use crate::dao::storage::StorageResult;
use futures::{future::BoxFuture, stream::BoxStream};

/// Abstraction over the remote relational store holding entries and classes.
///
/// Reads may be served by a lagging replica; writes return the row as the
/// primary stored it.
pub trait TrialStore: Send + Sync {
    /// Read one entry.
    fn find_entry(&self, id: EntryId) -> BoxFuture<'static, StorageResult<Option<EntryEntity>>>;
    /// Read every entry of a class.
    fn list_class_entries(
        &self,
        class_id: ClassId,
    ) -> BoxFuture<'static, StorageResult<Vec<EntryEntity>>>;
    /// Resolve the class of an entry through the entry/class join view.
    fn find_class_id_for_entry(
        &self,
        entry_id: EntryId,
    ) -> BoxFuture<'static, StorageResult<Option<ClassId>>>;
    /// Patch an entry; rejected while locked if the patch touches protected fields.
    fn update_entry(
        &self,
        id: EntryId,
        patch: EntryPatch,
    ) -> BoxFuture<'static, StorageResult<EntryEntity>>;
    /// Read one class.
    fn find_class(&self, id: ClassId) -> BoxFuture<'static, StorageResult<Option<ClassEntity>>>;
    /// Patch a class.
    fn update_class(
        &self,
        id: ClassId,
        patch: ClassPatch,
    ) -> BoxFuture<'static, StorageResult<ClassEntity>>;
    /// Read one trial.
    fn find_trial(&self, id: TrialId) -> BoxFuture<'static, StorageResult<Option<TrialEntity>>>;
    /// Read one show.
    fn find_show(&self, id: ShowId) -> BoxFuture<'static, StorageResult<Option<ShowEntity>>>;
    /// Clear the write guard protecting a scored entry.
    fn unlock_entry(&self, id: EntryId) -> BoxFuture<'static, StorageResult<()>>;
    /// Run the remote ranking procedure.
    fn recalculate_placements(
        &self,
        request: PlacementRequest,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Stream remote mutations of `table` rows matching `filter`.
    fn subscribe(
        &self,
        table: Table,
        filter: ChangeFilter,
    ) -> BoxStream<'static, StorageResult<ChangeEvent>>;
    /// Cheap liveness check.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Attempt to restore the connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
