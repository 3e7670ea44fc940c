/// Record repository: the single place that decides between writing to the
/// remote store and handing an operation to the durable queue.
///
/// Every write resolves the tenant first, short-circuits to the queue while
/// offline, and otherwise calls the remote store through the retry policy.
/// A network-class failure falls back to the queue; a rejection is returned
/// to the caller and never queued. Replays from the drainer pass
/// `skip_queue = true` so a failing entry is never queued a second time.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use tally_core::cache::ReadCache;
use tally_core::records::{ActivityEntry, ActivityKind, InlineAttachment, Settings};
use tally_core::retry::retry_async;
use tally_core::{
    EngineConfig, Error, Operation, OperationDraft, OperationId, PendingOperation, Record, RecordId,
    Result, RetryPolicy, SharedClock, SharedQueueStore, Table, TenantId,
};

use crate::connectivity::{Connectivity, QueueDepth};
use crate::remote::{
    attachment_path, Query, SharedBlobStore, SharedRemote, ALREADY_RETURNED,
};
use crate::session::Session;

/// Where a write ended up
#[derive(Debug, Clone, PartialEq)]
pub enum Persisted<T> {
    /// The remote store accepted the write; carries its canonical result
    Confirmed(T),
    /// The write is waiting in the durable queue
    Queued { record: T, operation_id: OperationId },
}

impl<T> Persisted<T> {
    pub fn is_queued(&self) -> bool {
        matches!(self, Persisted::Queued { .. })
    }

    pub fn record(&self) -> &T {
        match self {
            Persisted::Confirmed(r) | Persisted::Queued { record: r, .. } => r,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Persisted::Confirmed(r) | Persisted::Queued { record: r, .. } => r,
        }
    }
}

/// Everything the repository talks to
pub struct RepositoryDeps {
    pub remote: SharedRemote,
    pub blobs: SharedBlobStore,
    pub store: SharedQueueStore,
    pub session: Arc<Session>,
    pub connectivity: Arc<Connectivity>,
    pub clock: SharedClock,
}

pub struct Repository {
    remote: SharedRemote,
    blobs: SharedBlobStore,
    store: SharedQueueStore,
    session: Arc<Session>,
    connectivity: Arc<Connectivity>,
    cache: ReadCache,
    clock: SharedClock,
    depth: QueueDepth,
    retry: RetryPolicy,
}

impl Repository {
    pub fn new(deps: RepositoryDeps, config: &EngineConfig) -> Self {
        let depth = QueueDepth::new(deps.store.count());
        Self {
            cache: ReadCache::new(config.memory_cache_ttl, deps.clock.clone()),
            clock: deps.clock,
            remote: deps.remote,
            blobs: deps.blobs,
            store: deps.store,
            session: deps.session,
            connectivity: deps.connectivity,
            depth,
            retry: config.retry_policy.clone(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn connectivity(&self) -> &Arc<Connectivity> {
        &self.connectivity
    }

    pub fn store(&self) -> &SharedQueueStore {
        &self.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Insert or replace a record.
    pub async fn persist<T: Record>(&self, mut record: T, skip_queue: bool) -> Result<Persisted<T>> {
        let tenant = self.session.tenant()?;
        record.set_tenant(tenant.clone());
        record.clear_timestamps();

        let operation = record.clone().into_upsert();
        let provisional = record.clone();
        let result = self
            .remote_or_queue(&tenant, operation, skip_queue, provisional, || {
                self.write_record(&tenant, record)
            })
            .await?;

        if !result.is_queued() {
            self.invalidate(&tenant, T::TABLE);
        }
        Ok(result)
    }

    /// Delete a record and, once the delete is confirmed, its attachment.
    pub async fn delete(
        &self,
        table: Table,
        id: &RecordId,
        image_url: Option<&str>,
        skip_queue: bool,
    ) -> Result<Persisted<()>> {
        let tenant = self.session.tenant()?;
        let operation = Operation::DeleteRecord {
            table,
            id: id.clone(),
            image_url: image_url.map(str::to_string),
        };

        let remote = &self.remote;
        let retry = &self.retry;
        let owner = &tenant;
        let result = self
            .remote_or_queue(&tenant, operation, skip_queue, (), move || async move {
                retry_async(retry, move || async move {
                    remote.delete(table, id, owner).await.map_err(Error::from)
                })
                .await
            })
            .await?;

        if !result.is_queued() {
            self.invalidate(&tenant, table);
            if let Some(url) = image_url {
                if let Err(e) = self.blobs.delete(url).await {
                    warn!(table = %table, id = %id, error = %e, "Failed to delete attachment");
                }
            }
        }
        Ok(result)
    }

    pub async fn return_sale(&self, id: &RecordId, skip_queue: bool) -> Result<Persisted<()>> {
        let tenant = self.session.tenant()?;
        let args = json!({ "sale_uuid": id, "user_uuid": tenant });
        let operation = Operation::ReturnSale { id: id.clone() };
        let result = self
            .remote_or_queue(&tenant, operation, skip_queue, (), || {
                self.call_procedure("return_sale", args)
            })
            .await?;
        if !result.is_queued() {
            self.invalidate(&tenant, Table::Sales);
        }
        Ok(result)
    }

    pub async fn return_purchase(&self, id: &RecordId, skip_queue: bool) -> Result<Persisted<()>> {
        let tenant = self.session.tenant()?;
        let args = json!({ "purchase_uuid": id, "user_uuid": tenant });
        let operation = Operation::ReturnPurchase { id: id.clone() };
        let result = self
            .remote_or_queue(&tenant, operation, skip_queue, (), || {
                self.call_procedure("return_purchase", args)
            })
            .await?;
        if !result.is_queued() {
            self.invalidate(&tenant, Table::Purchases);
        }
        Ok(result)
    }

    /// Upsert the tenant's settings row (one per tenant, keyed by `user_id`).
    pub async fn update_settings(
        &self,
        settings: Settings,
        skip_queue: bool,
    ) -> Result<Persisted<Settings>> {
        let tenant = self.session.tenant()?;
        let row = json!({
            "id": tenant,
            "user_id": tenant,
            "accounting_settings": settings.accounting_settings,
            "exchange_rates": settings.exchange_rates,
        });
        let operation = Operation::UpdateSettings(settings.clone());

        let remote = &self.remote;
        let retry = &self.retry;
        let row = &row;
        let result = self
            .remote_or_queue(&tenant, operation, skip_queue, settings, move || async move {
                let stored = retry_async(retry, move || async move {
                    remote
                        .upsert(Table::UserSettings, row.clone())
                        .await
                        .map_err(Error::from)
                })
                .await?;
                Ok(serde_json::from_value::<Settings>(stored)?)
            })
            .await?;

        self.session.set_settings(result.record().clone());
        if !result.is_queued() {
            self.invalidate(&tenant, Table::UserSettings);
        }
        Ok(result)
    }

    /// Append an entry to the tenant's activity log.
    ///
    /// Best effort: skipped while offline, never queued, and a failed write
    /// only logs a warning.
    pub async fn log_activity(&self, kind: ActivityKind, action: &str, details: &str) {
        if !self.connectivity.is_online() {
            return;
        }
        let Ok(tenant) = self.session.tenant() else {
            return;
        };
        let entry = ActivityEntry::new(
            tenant.clone(),
            kind,
            action,
            details,
            self.clock.now_utc(),
        );
        let row = match serde_json::to_value(&entry) {
            Ok(row) => row,
            Err(e) => {
                warn!(action, error = %e, "Failed to encode activity entry");
                return;
            }
        };

        let row = &row;
        let remote = &self.remote;
        let written = retry_async(&self.retry, move || async move {
            remote
                .upsert(Table::ActivityLog, row.clone())
                .await
                .map_err(Error::from)
        })
        .await;
        match written {
            Ok(_) => self.invalidate(&tenant, Table::ActivityLog),
            Err(e) => warn!(action, error = %e, "Failed to log activity"),
        }
    }

    /// Latest activity entries, newest first
    pub async fn activity_logs(&self) -> Result<Vec<ActivityEntry>> {
        let rows = self.fetch_rows(Table::ActivityLog, true).await?;
        Ok(decode_rows(Table::ActivityLog, rows))
    }

    /// Write a chunk of backup rows in one remote call. Not queued: a restore
    /// needs the remote store.
    pub async fn restore_chunk(&self, table: Table, rows: Vec<Value>) -> Result<usize> {
        let tenant = self.session.tenant()?;
        let rows = &rows;
        let remote = &self.remote;
        let stored = retry_async(&self.retry, move || async move {
            remote
                .upsert_many(table, rows.clone())
                .await
                .map_err(Error::from)
        })
        .await?;
        self.invalidate(&tenant, table);
        Ok(stored.len())
    }

    /// List a table: memory cache, then remote, then durable snapshot, then empty.
    pub async fn fetch<T: Record>(&self, force_fresh: bool) -> Result<Vec<T>> {
        let rows = self.fetch_rows(T::TABLE, force_fresh).await?;
        Ok(decode_rows(T::TABLE, rows))
    }

    /// Load the tenant's settings into the session
    pub async fn fetch_settings(&self, force_fresh: bool) -> Result<Settings> {
        let rows = self.fetch_rows(Table::UserSettings, force_fresh).await?;
        let settings = match rows {
            Value::Array(rows) => rows
                .into_iter()
                .next()
                .map(serde_json::from_value::<Settings>)
                .transpose()?
                .unwrap_or_default(),
            _ => Settings::default(),
        };
        self.session.set_settings(settings.clone());
        Ok(settings)
    }

    async fn fetch_rows(&self, table: Table, force_fresh: bool) -> Result<Value> {
        let tenant = self.session.tenant()?;
        let key = ReadCache::key(tenant.as_str(), table.as_str());

        if !force_fresh {
            if let Some(rows) = self.cache.get(&key) {
                debug!(table = %table, "Serving from memory cache");
                return Ok(rows);
            }
        }

        if self.connectivity.is_online() {
            let query = Query::for_table(table, tenant.clone());
            let query = &query;
            let remote = &self.remote;
            let fetched = retry_async(&self.retry, move || async move {
                remote.query(table, query).await.map_err(Error::from)
            })
            .await;

            match fetched {
                Ok(rows) => {
                    let rows = Value::Array(rows);
                    self.cache.put(key.clone(), rows.clone());
                    if let Err(e) = self.store.save_snapshot(&key, rows.clone()) {
                        warn!(table = %table, error = %e, "Failed to save snapshot");
                    }
                    return Ok(rows);
                }
                Err(e) if e.is_network() => {
                    info!(table = %table, "Network error while fetching, falling back to snapshot");
                }
                Err(e) => {
                    warn!(table = %table, error = %e, "Remote fetch failed, falling back to snapshot");
                }
            }
        }

        match self.store.load_snapshot(&key) {
            Ok(Some(rows)) => Ok(rows),
            Ok(None) => Ok(Value::Array(Vec::new())),
            Err(e) => {
                warn!(table = %table, error = %e, "Failed to read snapshot");
                Ok(Value::Array(Vec::new()))
            }
        }
    }

    /// Apply a queued operation against the remote store, never re-queueing it.
    pub async fn replay(&self, op: &PendingOperation) -> Result<()> {
        match op.operation.clone() {
            Operation::UpsertSale(r) => self.persist(r, true).await.map(drop),
            Operation::UpsertPurchase(r) => self.persist(r, true).await.map(drop),
            Operation::UpsertCustomer(r) => self.persist(r, true).await.map(drop),
            Operation::UpsertSupplier(r) => self.persist(r, true).await.map(drop),
            Operation::UpsertVoucher(r) => self.persist(r, true).await.map(drop),
            Operation::UpsertExpense(r) => self.persist(r, true).await.map(drop),
            Operation::UpsertCategory(r) => self.persist(r, true).await.map(drop),
            Operation::UpsertWaste(r) => self.persist(r, true).await.map(drop),
            Operation::UpsertNotification(r) => self.persist(r, true).await.map(drop),
            Operation::UpsertExpenseTemplate(r) => self.persist(r, true).await.map(drop),
            Operation::UpsertOpeningBalance(r) => self.persist(r, true).await.map(drop),
            Operation::DeleteRecord {
                table,
                id,
                image_url,
            } => self
                .delete(table, &id, image_url.as_deref(), true)
                .await
                .map(drop),
            Operation::ReturnSale { id } => {
                already_returned_ok(self.return_sale(&id, true).await.map(drop))
            }
            Operation::ReturnPurchase { id } => {
                already_returned_ok(self.return_purchase(&id, true).await.map(drop))
            }
            Operation::UpdateSettings(s) => self.update_settings(s, true).await.map(drop),
        }
    }

    /// Upload an inline attachment and return its reference
    pub async fn upload_attachment(
        &self,
        tenant: &TenantId,
        table: Table,
        owner: &str,
        attachment: &InlineAttachment,
    ) -> Result<String> {
        let folder = table.attachment_folder().unwrap_or(table.as_str());
        let path = attachment_path(tenant, folder, owner, &attachment.file_name);
        let data = Bytes::from(attachment.data.clone());
        let url = self
            .blobs
            .upload(&path, data, &attachment.media_type)
            .await?;
        debug!(path = %path, "Uploaded attachment");
        Ok(url)
    }

    pub fn pending_operations(&self) -> Result<Vec<PendingOperation>> {
        self.store.list_all()
    }

    /// Queued operations of the signed-in tenant, in queue order
    pub fn tenant_operations(&self) -> Result<Vec<PendingOperation>> {
        let tenant = self.session.tenant()?;
        let mut ops = self.store.list_all()?;
        ops.retain(|op| op.tenant_id == tenant);
        Ok(ops)
    }

    pub fn queue_depth(&self) -> usize {
        self.store.count()
    }

    pub fn queue_depth_watch(&self) -> tokio::sync::watch::Receiver<usize> {
        self.depth.subscribe()
    }

    pub fn publish_queue_depth(&self) {
        self.depth.publish(self.store.count());
    }

    /// Drop both cache layers; queued operations are untouched
    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear();
        self.store.clear_snapshots()
    }

    fn invalidate(&self, tenant: &TenantId, table: Table) {
        self.cache
            .invalidate(&ReadCache::key(tenant.as_str(), table.as_str()));
    }

    async fn remote_or_queue<R, F, Fut>(
        &self,
        tenant: &TenantId,
        operation: Operation,
        skip_queue: bool,
        provisional: R,
        call: F,
    ) -> Result<Persisted<R>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        if !skip_queue && (!self.connectivity.is_online() || self.has_queued(tenant, &operation)?) {
            let operation_id = self.enqueue(tenant, operation)?;
            return Ok(Persisted::Queued {
                record: provisional,
                operation_id,
            });
        }

        let action = operation.action();
        match call().await {
            Ok(result) => Ok(Persisted::Confirmed(result)),
            Err(e) if e.is_network() && !skip_queue => {
                info!(action, error = %e, "Remote unreachable, queuing operation");
                let operation_id = self.enqueue(tenant, operation)?;
                Ok(Persisted::Queued {
                    record: provisional,
                    operation_id,
                })
            }
            Err(e) => {
                error!(action, error = %e, "Remote write failed");
                Err(e)
            }
        }
    }

    /// True when an earlier operation on the same record is still waiting;
    /// a new write must then queue behind it.
    fn has_queued(&self, tenant: &TenantId, operation: &Operation) -> Result<bool> {
        let key = operation.record_key(tenant);
        let queued = self
            .store
            .list_all()?
            .iter()
            .any(|op| &op.tenant_id == tenant && op.record_key() == key);
        if queued {
            debug!(record = %key, "Record has queued operations, queuing behind them");
        }
        Ok(queued)
    }

    fn enqueue(&self, tenant: &TenantId, mut operation: Operation) -> Result<OperationId> {
        operation.clear_timestamps();
        let pending = self
            .store
            .enqueue(OperationDraft::new(tenant.clone(), operation))?;
        info!(
            id = %pending.id,
            action = pending.operation.action(),
            "Operation queued for sync"
        );
        self.publish_queue_depth();
        Ok(pending.id)
    }

    async fn write_record<T: Record>(&self, tenant: &TenantId, mut record: T) -> Result<T> {
        if let Some(attachment) = record.take_pending_attachment() {
            let owner = record.id().to_string();
            let url = self
                .upload_attachment(tenant, T::TABLE, &owner, &attachment)
                .await?;
            record.set_image_url(url);
        }

        let row = remote_row(&record)?;
        let row = &row;
        let remote = &self.remote;
        let stored = retry_async(&self.retry, move || async move {
            remote.upsert(T::TABLE, row.clone()).await.map_err(Error::from)
        })
        .await?;
        Ok(serde_json::from_value(stored)?)
    }

    async fn call_procedure(&self, name: &'static str, args: Value) -> Result<()> {
        let args = &args;
        let remote = &self.remote;
        retry_async(&self.retry, move || async move {
            remote
                .call_procedure(name, args.clone())
                .await
                .map_err(Error::from)
        })
        .await?;
        Ok(())
    }
}

/// Serialize a record into the row the remote store expects
fn remote_row<T: Record>(record: &T) -> Result<Value> {
    let mut row = serde_json::to_value(record)?;
    if let Value::Object(map) = &mut row {
        for field in ["pending_image", "created_at", "updated_at"] {
            map.remove(field);
        }
    }
    Ok(row)
}

fn decode_rows<T: DeserializeOwned>(table: Table, rows: Value) -> Vec<T> {
    match rows {
        Value::Array(rows) => rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value::<T>(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(table = %table, error = %e, "Skipping undecodable row");
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// A return replayed after it already took effect remotely counts as applied
fn already_returned_ok(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::RemoteRejected { code, .. }) if code == ALREADY_RETURNED => {
            debug!("Return was already applied remotely");
            Ok(())
        }
        other => other,
    }
}
