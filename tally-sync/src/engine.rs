/// Engine composition
///
/// Everything is wired once here: queue store, repository, services and
/// drainer share the same session, connectivity handle and clock.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use tally_core::store::open_store;
use tally_core::records::ActivityEntry;
use tally_core::{
    BackupPackage, EngineConfig, RecordId, SharedClock, SharedQueueStore, SystemClock, Table,
    TenantId,
};

use crate::connectivity::Connectivity;
use crate::drainer::{DrainListener, DrainReport, Drainer};
use crate::remote::{SharedBlobStore, SharedRemote};
use crate::repository::{Repository, RepositoryDeps};
use crate::services::{
    BackupService, BusinessService, FinanceService, InventoryService, LogSink,
    NotificationService, RestoreReport, SharedSink,
};
use crate::session::Session;
use crate::state::SyncStatus;

pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<SharedClock>,
    remote: Option<SharedRemote>,
    blobs: Option<SharedBlobStore>,
    store: Option<SharedQueueStore>,
    sink: Option<SharedSink>,
    tenant: Option<TenantId>,
    online: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            clock: None,
            remote: None,
            blobs: None,
            store: None,
            sink: None,
            tenant: None,
            online: true,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn remote(mut self, remote: SharedRemote) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn blobs(mut self, blobs: SharedBlobStore) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Use an already opened queue store instead of opening one from the config
    pub fn store(mut self, store: SharedQueueStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }

    /// Initial connectivity; the host updates it through `Engine::connectivity`
    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid engine configuration")?;

        let remote = self.remote.context("a remote store is required")?;
        let blobs = self.blobs.context("a blob store is required")?;
        let clock: SharedClock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config, clock.clone()).context("failed to open queue store")?,
        };
        let sink: SharedSink = self.sink.unwrap_or_else(|| Arc::new(LogSink));

        let session = Arc::new(match self.tenant {
            Some(tenant) => Session::signed_in(tenant),
            None => Session::new(),
        });
        let connectivity = Arc::new(Connectivity::new(self.online));

        let repo = Arc::new(Repository::new(
            RepositoryDeps {
                remote,
                blobs,
                store,
                session,
                connectivity,
                clock,
            },
            &self.config,
        ));

        let inventory = Arc::new(InventoryService::new(repo.clone(), sink.clone()));
        let business = Arc::new(BusinessService::new(
            repo.clone(),
            inventory.clone(),
            sink.clone(),
        ));
        let finance = Arc::new(FinanceService::new(
            repo.clone(),
            inventory.clone(),
            business.clone(),
            sink.clone(),
        ));
        let notifications = Arc::new(NotificationService::new(repo.clone(), sink.clone()));
        let backup = BackupService::new(
            repo.clone(),
            inventory.clone(),
            business.clone(),
            finance.clone(),
            notifications.clone(),
            sink,
        );

        let drainer = Arc::new(Drainer::new(repo.clone(), self.config.drain_interval));
        drainer.set_listener(Arc::new(StatusReflector {
            inventory: inventory.clone(),
            business: business.clone(),
            finance: finance.clone(),
            notifications: notifications.clone(),
        }));

        info!(queued = repo.queue_depth(), "Engine ready");

        Ok(Engine {
            config: self.config,
            repo,
            inventory,
            business,
            finance,
            notifications,
            backup,
            drainer,
        })
    }
}

/// The composed offline-first engine handed to the UI
pub struct Engine {
    config: EngineConfig,
    repo: Arc<Repository>,
    inventory: Arc<InventoryService>,
    business: Arc<BusinessService>,
    finance: Arc<FinanceService>,
    notifications: Arc<NotificationService>,
    backup: BackupService,
    drainer: Arc<Drainer>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        self.repo.session()
    }

    pub fn connectivity(&self) -> &Arc<Connectivity> {
        self.repo.connectivity()
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub fn inventory(&self) -> &Arc<InventoryService> {
        &self.inventory
    }

    pub fn business(&self) -> &Arc<BusinessService> {
        &self.business
    }

    pub fn finance(&self) -> &Arc<FinanceService> {
        &self.finance
    }

    pub fn notifications(&self) -> &Arc<NotificationService> {
        &self.notifications
    }

    pub fn drainer(&self) -> &Arc<Drainer> {
        &self.drainer
    }

    pub fn queue_depth(&self) -> usize {
        self.repo.queue_depth()
    }

    pub fn queue_depth_watch(&self) -> tokio::sync::watch::Receiver<usize> {
        self.repo.queue_depth_watch()
    }

    /// Refresh every collection, then drain the queue
    pub async fn reload(&self, force_fresh: bool) -> tally_core::Result<DrainReport> {
        self.finance.reload(force_fresh).await?;
        self.business.reload(force_fresh).await?;
        // after the source records, so their cached rows serve the stock replay
        self.inventory.reload(force_fresh).await?;
        self.notifications.reload(force_fresh).await?;
        self.drainer.drain().await
    }

    pub fn prepare_backup(&self) -> tally_core::Result<BackupPackage> {
        self.backup.prepare()
    }

    /// Restore a backup package, then reload every collection from the remote
    pub async fn restore_backup(
        &self,
        package: &BackupPackage,
    ) -> tally_core::Result<RestoreReport> {
        let report = self.backup.restore(package).await?;
        self.reload(true).await?;
        Ok(report)
    }

    /// Latest entries of the tenant's activity log, newest first
    pub async fn activity_logs(&self) -> tally_core::Result<Vec<ActivityEntry>> {
        self.repo.activity_logs().await
    }

    pub async fn drain(&self) -> tally_core::Result<DrainReport> {
        self.drainer.drain().await
    }

    /// Start background draining on reconnect and on the configured interval
    pub fn start(&self) {
        self.drainer.start();
    }

    pub async fn stop(&self) {
        self.drainer.stop().await;
    }

    /// End the session and drop cached reads; queued operations stay
    pub fn sign_out(&self) -> tally_core::Result<()> {
        self.repo.session().sign_out();
        self.repo.clear_cache()
    }
}

/// Mirrors drain results onto the per-record sync status of the collections
struct StatusReflector {
    inventory: Arc<InventoryService>,
    business: Arc<BusinessService>,
    finance: Arc<FinanceService>,
    notifications: Arc<NotificationService>,
}

impl StatusReflector {
    fn set_status(&self, table: Table, id: &RecordId, status: SyncStatus) {
        match table {
            Table::Sales => self.business.sales().set_status(id, status),
            Table::Purchases => self.business.purchases().set_status(id, status),
            Table::Customers => self.business.customers().set_status(id, status),
            Table::Suppliers => self.business.suppliers().set_status(id, status),
            Table::Vouchers => self.finance.vouchers().set_status(id, status),
            Table::Expenses => self.finance.expenses().set_status(id, status),
            Table::Categories => self.inventory.categories().set_status(id, status),
            Table::Waste => self.finance.waste().set_status(id, status),
            Table::Notifications => self.notifications.notifications().set_status(id, status),
            Table::ExpenseTemplates => self.finance.expense_templates().set_status(id, status),
            Table::OpeningBalances => self.finance.opening_balances().set_status(id, status),
            Table::UserSettings | Table::ActivityLog => {}
        }
    }
}

impl DrainListener for StatusReflector {
    fn on_drained(&self, report: &DrainReport) {
        for entry in &report.applied_entries {
            if let Some(id) = &entry.record_id {
                self.set_status(entry.table, id, SyncStatus::Confirmed);
            }
        }
        for failure in &report.failures {
            if let Some(id) = &failure.entry.record_id {
                self.set_status(
                    failure.entry.table,
                    id,
                    SyncStatus::Failed(failure.reason.clone()),
                );
            }
        }
    }
}
