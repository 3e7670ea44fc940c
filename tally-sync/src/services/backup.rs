use std::sync::Arc;
use tally_core::backup::{BackupPackage, RESTORE_CHUNK_SIZE};
use tally_core::records::{ActivityKind, NotificationKind};
use tally_core::{Error, Result, Table};
use tracing::{error, info};

use super::{
    BusinessService, FinanceService, InventoryService, Notice, NotificationService, SharedSink,
};
use crate::repository::Repository;

/// Outcome of writing a backup package back to the remote store
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Rows the remote store accepted
    pub restored: usize,
    /// Chunks the remote store refused; the other chunks still went through
    pub failed_chunks: Vec<(Table, usize, Error)>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }
}

/// Backup packages built from the collections in memory, and their restore
pub struct BackupService {
    repo: Arc<Repository>,
    inventory: Arc<InventoryService>,
    business: Arc<BusinessService>,
    finance: Arc<FinanceService>,
    notifications: Arc<NotificationService>,
    sink: SharedSink,
}

impl BackupService {
    pub fn new(
        repo: Arc<Repository>,
        inventory: Arc<InventoryService>,
        business: Arc<BusinessService>,
        finance: Arc<FinanceService>,
        notifications: Arc<NotificationService>,
        sink: SharedSink,
    ) -> Self {
        Self {
            repo,
            inventory,
            business,
            finance,
            notifications,
            sink,
        }
    }

    /// Snapshot every collection and the session settings
    pub fn prepare(&self) -> Result<BackupPackage> {
        self.repo.session().tenant()?;
        let mut package = BackupPackage::empty(self.repo.clock().now_utc());
        package.settings = self.repo.session().settings();
        package.customers = self.business.customers().records();
        package.suppliers = self.business.suppliers().records();
        package.categories = self.inventory.categories().records();
        package.sales = self.business.sales().records();
        package.purchases = self.business.purchases().records();
        package.vouchers = self.finance.vouchers().records();
        package.expenses = self.finance.expenses().records();
        package.waste = self.finance.waste().records();
        package.notifications = self.notifications.notifications().records();
        package.expense_templates = self.finance.expense_templates().records();
        package.opening_balances = self.finance.opening_balances().records();
        info!(records = package.len(), "Backup package prepared");
        Ok(package)
    }

    /// Write the package's rows to the remote store under the signed-in
    /// tenant, in chunks. A refused chunk is logged and skipped.
    ///
    /// Needs a connection; nothing is queued. Collections are not reloaded
    /// here.
    pub async fn restore(&self, package: &BackupPackage) -> Result<RestoreReport> {
        let tenant = self.repo.session().tenant()?;
        if !self.repo.connectivity().is_online() {
            return Err(Error::Network("restoring a backup needs a connection".into()));
        }

        let mut report = RestoreReport::default();
        for (table, rows) in package.restore_rows(&tenant)? {
            info!(table = %table, rows = rows.len(), "Restoring records");
            for (index, chunk) in rows.chunks(RESTORE_CHUNK_SIZE).enumerate() {
                match self.repo.restore_chunk(table, chunk.to_vec()).await {
                    Ok(stored) => report.restored += stored,
                    Err(e) => {
                        error!(table = %table, chunk = index, error = %e, "Failed to restore chunk");
                        report.failed_chunks.push((table, index, e));
                    }
                }
            }
        }

        self.repo
            .log_activity(
                ActivityKind::Data,
                "Restored backup",
                &format!("{} records", report.restored),
            )
            .await;
        let notice = if report.is_complete() {
            Notice::new(
                "Backup restored",
                format!("{} records restored", report.restored),
                NotificationKind::Success,
            )
        } else {
            Notice::new(
                "Backup partly restored",
                format!(
                    "{} records restored, {} chunks failed",
                    report.restored,
                    report.failed_chunks.len()
                ),
                NotificationKind::Warning,
            )
        };
        self.sink.notify(notice);
        Ok(report)
    }
}
