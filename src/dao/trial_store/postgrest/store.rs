use std::{collections::HashSet, sync::Arc, time::Duration};

use futures::{future::BoxFuture, stream::BoxStream};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::dao::{
    models::{
        ChangeEvent, ChangeFilter, ChangeKind, ChangeRecord, ClassEntity, ClassId, ClassPatch,
        EntryClassLink, EntryEntity, EntryId, EntryPatch, PlacementRequest, ShowEntity, ShowId,
        Table, TrialEntity, TrialId,
    },
    storage::StorageResult,
    trial_store::TrialStore,
};

use super::{
    config::PostgrestConfig,
    error::{PostgrestDaoError, PostgrestResult},
    models::{
        CLASSES, ENTRIES, ENTRY_CLASS_VIEW, PostgrestErrorBody, RECALCULATE_PLACEMENTS_RPC,
        REST_PREFIX, SHOWS, TRIALS, UNLOCK_ENTRY_RPC, UnlockEntryArgs, eq,
    },
};

type Query<'a> = [(&'a str, String)];

/// [`TrialStore`] talking to a PostgREST endpoint over HTTP.
#[derive(Clone)]
pub struct PostgrestTrialStore {
    client: Client,
    base_url: Arc<str>,
    api_key: Arc<str>,
    schema: Arc<str>,
    poll_interval: Duration,
}

impl PostgrestTrialStore {
    /// Build the HTTP client and make sure the endpoint answers.
    pub async fn connect(config: PostgrestConfig) -> PostgrestResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| PostgrestDaoError::ClientBuilder { source })?;

        let store = Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            api_key: Arc::from(config.api_key),
            schema: Arc::from(config.schema),
            poll_interval: config.poll_interval,
        };

        store.ping().await?;
        Ok(store)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, REST_PREFIX, path);
        let profile_header = if method == Method::GET || method == Method::HEAD {
            "Accept-Profile"
        } else {
            "Content-Profile"
        };

        self.client
            .request(method, url)
            .header("apikey", self.api_key.as_ref())
            .bearer_auth(self.api_key.as_ref())
            .header(profile_header, self.schema.as_ref())
    }

    async fn send(&self, path: &str, builder: RequestBuilder) -> PostgrestResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|source| PostgrestDaoError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .json::<PostgrestErrorBody>()
            .await
            .unwrap_or_default();
        Err(PostgrestDaoError::RequestStatus {
            path: path.to_string(),
            status,
            message: body.describe(),
        })
    }

    async fn decode<T>(path: &str, response: Response) -> PostgrestResult<T>
    where
        T: DeserializeOwned,
    {
        response
            .json::<T>()
            .await
            .map_err(|source| PostgrestDaoError::DecodeResponse {
                path: path.to_string(),
                source,
            })
    }

    async fn select<T>(&self, table: &str, query: &Query<'_>) -> PostgrestResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let builder = self
            .request(Method::GET, table)
            .query(&[("select", "*")])
            .query(query);
        let response = self.send(table, builder).await?;
        Self::decode(table, response).await
    }

    async fn select_by_id<T>(&self, table: &str, id: i64) -> PostgrestResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let rows = self
            .select::<T>(table, &[("id", eq(id)), ("limit", "1".to_string())])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn patch<B, T>(&self, table: &'static str, id: i64, body: &B) -> PostgrestResult<T>
    where
        B: ?Sized + Serialize,
        T: DeserializeOwned,
    {
        let builder = self
            .request(Method::PATCH, table)
            .query(&[("id", eq(id))])
            .header("Prefer", "return=representation")
            .json(body);
        let response = self.send(table, builder).await?;
        let rows = Self::decode::<Vec<T>>(table, response).await?;
        rows.into_iter()
            .next()
            .ok_or(PostgrestDaoError::MissingRow { table, id })
    }

    async fn rpc<B>(&self, procedure: &str, args: &B) -> PostgrestResult<()>
    where
        B: ?Sized + Serialize,
    {
        let builder = self.request(Method::POST, procedure).json(args);
        self.send(procedure, builder).await.map(|_| ())
    }

    async fn ping(&self) -> PostgrestResult<()> {
        let builder = self.request(Method::GET, "");
        self.send(REST_PREFIX, builder).await.map(|_| ())
    }

    /// Rows of `table` matching `filter` inside `window`.
    async fn fetch_changes(
        &self,
        table: Table,
        filter: &ChangeFilter,
        window: ChangeWindow,
    ) -> PostgrestResult<Vec<ChangeRecord>> {
        let mut query = vec![(filter.column.as_str(), eq(&filter.value))];
        match window {
            ChangeWindow::Latest => {
                query.push(("order", "updated_at.desc.nullslast".to_string()));
                query.push(("limit", "1".to_string()));
            }
            ChangeWindow::Since(since) => {
                if let Some(since) = since {
                    let cursor = since
                        .format(&Rfc3339)
                        .map_err(|source| PostgrestDaoError::CursorFormat { source })?;
                    query.push(("updated_at", format!("gte.{cursor}")));
                }
                query.push(("order", "updated_at.asc".to_string()));
            }
        }

        Ok(match table {
            Table::Entries => self
                .select::<EntryEntity>(ENTRIES, &query)
                .await?
                .into_iter()
                .map(ChangeRecord::Entry)
                .collect(),
            Table::Classes => self
                .select::<ClassEntity>(CLASSES, &query)
                .await?
                .into_iter()
                .map(ChangeRecord::Class)
                .collect(),
        })
    }
}

/// Rows requested by one subscription poll.
#[derive(Debug, Clone, Copy)]
enum ChangeWindow {
    /// The most recently modified row only.
    Latest,
    /// Rows modified at or after the cursor, oldest first; every row without one.
    Since(Option<OffsetDateTime>),
}

/// Poll position of a change subscription, expressed in the server's
/// `updated_at` clock.
///
/// Rows sharing the cursor timestamp are re-read by the inclusive `gte`
/// filter; the ids already delivered at that timestamp are skipped.
#[derive(Debug, Default)]
struct ChangeCursor {
    since: Option<OffsetDateTime>,
    delivered_at_since: HashSet<i64>,
}

impl ChangeCursor {
    /// Position the cursor on the newest row present when polling starts.
    fn baseline(&mut self, latest: &[ChangeRecord]) {
        for record in latest {
            self.advance(record);
        }
    }

    /// Whether `record` is new to the subscriber; advances the cursor.
    fn admit(&mut self, record: &ChangeRecord) -> bool {
        if let (Some(since), Some(updated_at)) = (self.since, record.updated_at()) {
            if updated_at < since
                || (updated_at == since && self.delivered_at_since.contains(&record.key()))
            {
                return false;
            }
        }
        self.advance(record);
        true
    }

    fn advance(&mut self, record: &ChangeRecord) {
        let Some(updated_at) = record.updated_at() else {
            return;
        };
        match self.since {
            Some(since) if updated_at < since => {}
            Some(since) if updated_at == since => {
                self.delivered_at_since.insert(record.key());
            }
            _ => {
                self.since = Some(updated_at);
                self.delivered_at_since.clear();
                self.delivered_at_since.insert(record.key());
            }
        }
    }
}

impl TrialStore for PostgrestTrialStore {
    fn find_entry(&self, id: EntryId) -> BoxFuture<'static, StorageResult<Option<EntryEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.select_by_id(ENTRIES, id).await.map_err(Into::into) })
    }

    fn list_class_entries(
        &self,
        class_id: ClassId,
    ) -> BoxFuture<'static, StorageResult<Vec<EntryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .select(
                    ENTRIES,
                    &[("class_id", eq(class_id)), ("order", "armband.asc".to_string())],
                )
                .await
                .map_err(Into::into)
        })
    }

    fn find_class_id_for_entry(
        &self,
        entry_id: EntryId,
    ) -> BoxFuture<'static, StorageResult<Option<ClassId>>> {
        let store = self.clone();
        Box::pin(async move {
            let links = store
                .select::<EntryClassLink>(
                    ENTRY_CLASS_VIEW,
                    &[("entry_id", eq(entry_id)), ("limit", "1".to_string())],
                )
                .await?;
            Ok(links.into_iter().next().map(|link| link.class_id))
        })
    }

    fn update_entry(
        &self,
        id: EntryId,
        patch: EntryPatch,
    ) -> BoxFuture<'static, StorageResult<EntryEntity>> {
        let store = self.clone();
        Box::pin(async move { store.patch(ENTRIES, id, &patch).await.map_err(Into::into) })
    }

    fn find_class(&self, id: ClassId) -> BoxFuture<'static, StorageResult<Option<ClassEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.select_by_id(CLASSES, id).await.map_err(Into::into) })
    }

    fn update_class(
        &self,
        id: ClassId,
        patch: ClassPatch,
    ) -> BoxFuture<'static, StorageResult<ClassEntity>> {
        let store = self.clone();
        Box::pin(async move { store.patch(CLASSES, id, &patch).await.map_err(Into::into) })
    }

    fn find_trial(&self, id: TrialId) -> BoxFuture<'static, StorageResult<Option<TrialEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.select_by_id(TRIALS, id).await.map_err(Into::into) })
    }

    fn find_show(&self, id: ShowId) -> BoxFuture<'static, StorageResult<Option<ShowEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.select_by_id(SHOWS, id).await.map_err(Into::into) })
    }

    fn unlock_entry(&self, id: EntryId) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .rpc(UNLOCK_ENTRY_RPC, &UnlockEntryArgs { p_entry_id: id })
                .await
                .map_err(Into::into)
        })
    }

    fn recalculate_placements(
        &self,
        request: PlacementRequest,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .rpc(RECALCULATE_PLACEMENTS_RPC, &request)
                .await
                .map_err(Into::into)
        })
    }

    fn subscribe(
        &self,
        table: Table,
        filter: ChangeFilter,
    ) -> BoxStream<'static, StorageResult<ChangeEvent>> {
        let store = self.clone();
        Box::pin(async_stream::stream! {
            let mut cursor = ChangeCursor::default();
            let mut positioned = false;
            let mut ticker = tokio::time::interval(store.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !positioned {
                    match store.fetch_changes(table, &filter, ChangeWindow::Latest).await {
                        Ok(latest) => {
                            cursor.baseline(&latest);
                            positioned = true;
                        }
                        Err(err) => yield Err(err.into()),
                    }
                    continue;
                }

                let window = ChangeWindow::Since(cursor.since);
                match store.fetch_changes(table, &filter, window).await {
                    Ok(records) => {
                        let fresh = records
                            .into_iter()
                            .filter(|record| cursor.admit(record))
                            .collect::<Vec<_>>();
                        if !fresh.is_empty() {
                            debug!(table = %table, filter = %filter, count = fresh.len(), "polled remote changes");
                        }
                        for record in fresh {
                            yield Ok(ChangeEvent { kind: ChangeKind::Update, record });
                        }
                    }
                    Err(err) => yield Err(err.into()),
                }
            }
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn entry_at(id: EntryId, updated_at: OffsetDateTime) -> ChangeRecord {
        let mut entry = EntryEntity::new(id, 1, 100 + id as i32);
        entry.updated_at = Some(updated_at);
        ChangeRecord::Entry(entry)
    }

    #[test]
    fn cursor_starts_from_the_server_clock() {
        let mut cursor = ChangeCursor::default();
        cursor.baseline(&[entry_at(4, datetime!(2026-03-01 09:00 UTC))]);

        assert_eq!(cursor.since, Some(datetime!(2026-03-01 09:00 UTC)));
        assert!(!cursor.admit(&entry_at(4, datetime!(2026-03-01 09:00 UTC))));
        assert!(cursor.admit(&entry_at(5, datetime!(2026-03-01 09:00 UTC))));
    }

    #[test]
    fn rows_sharing_a_timestamp_are_delivered_once_each() {
        let mut cursor = ChangeCursor::default();
        let at = datetime!(2026-03-01 10:15 UTC);

        assert!(cursor.admit(&entry_at(1, at)));
        assert!(cursor.admit(&entry_at(2, at)));

        // The inclusive re-read returns both again plus a late writer at the same instant.
        assert!(!cursor.admit(&entry_at(1, at)));
        assert!(!cursor.admit(&entry_at(2, at)));
        assert!(cursor.admit(&entry_at(3, at)));
    }

    #[test]
    fn newer_rows_move_the_cursor_forward() {
        let mut cursor = ChangeCursor::default();
        assert!(cursor.admit(&entry_at(1, datetime!(2026-03-01 10:00 UTC))));
        assert!(cursor.admit(&entry_at(1, datetime!(2026-03-01 10:01 UTC))));

        assert_eq!(cursor.since, Some(datetime!(2026-03-01 10:01 UTC)));
        assert!(!cursor.admit(&entry_at(2, datetime!(2026-03-01 09:59 UTC))));
    }

    #[test]
    fn empty_baseline_reads_every_row_next() {
        let mut cursor = ChangeCursor::default();
        cursor.baseline(&[]);
        assert_eq!(cursor.since, None);
        assert!(cursor.admit(&entry_at(9, datetime!(2026-03-01 08:00 UTC))));
    }
}
