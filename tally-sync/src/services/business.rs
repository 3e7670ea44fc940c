use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tally_core::ledger::{purchase_movements, sale_movements, Movement, StockLine};
use tally_core::records::{Customer, NotificationKind, Purchase, Sale, Supplier};
use tally_core::{RecordId, Result, Table, ValidationError};
use tracing::info;

use super::{
    log_activity, optimistic_delete, optimistic_upsert, refresh, require_counterparty,
    InventoryService, Notice, SharedSink,
};
use crate::repository::{Persisted, Repository};
use crate::state::{Collection, MutationOutcome, SyncStatus};

/// Customers, suppliers, sales and purchases
pub struct BusinessService {
    repo: Arc<Repository>,
    inventory: Arc<InventoryService>,
    sink: SharedSink,
    customers: Collection<Customer>,
    suppliers: Collection<Supplier>,
    sales: Collection<Sale>,
    purchases: Collection<Purchase>,
}

impl BusinessService {
    pub fn new(repo: Arc<Repository>, inventory: Arc<InventoryService>, sink: SharedSink) -> Self {
        Self {
            repo,
            inventory,
            sink,
            customers: Collection::new(),
            suppliers: Collection::new(),
            sales: Collection::new(),
            purchases: Collection::new(),
        }
    }

    pub fn customers(&self) -> &Collection<Customer> {
        &self.customers
    }

    pub fn suppliers(&self) -> &Collection<Supplier> {
        &self.suppliers
    }

    pub fn sales(&self) -> &Collection<Sale> {
        &self.sales
    }

    pub fn purchases(&self) -> &Collection<Purchase> {
        &self.purchases
    }

    pub async fn save_customer(&self, customer: Customer) -> Result<MutationOutcome<Customer>> {
        self.repo.session().tenant()?;
        if customer.name.trim().is_empty() {
            return Err(ValidationError::Invalid("customer name is required".into()).into());
        }
        optimistic_upsert(&self.repo, &self.customers, self.sink.as_ref(), customer, || {}).await
    }

    pub async fn delete_customer(&self, id: &RecordId) -> Result<MutationOutcome<Customer>> {
        optimistic_delete(&self.repo, &self.customers, self.sink.as_ref(), id, |_| Vec::new(), |_| {})
            .await
    }

    pub async fn save_supplier(&self, supplier: Supplier) -> Result<MutationOutcome<Supplier>> {
        self.repo.session().tenant()?;
        if supplier.name.trim().is_empty() {
            return Err(ValidationError::Invalid("supplier name is required".into()).into());
        }
        optimistic_upsert(&self.repo, &self.suppliers, self.sink.as_ref(), supplier, || {}).await
    }

    pub async fn delete_supplier(&self, id: &RecordId) -> Result<MutationOutcome<Supplier>> {
        optimistic_delete(&self.repo, &self.suppliers, self.sink.as_ref(), id, |_| Vec::new(), |_| {})
            .await
    }

    /// Create a sale, or edit the one with the same id.
    ///
    /// Stock moves by the difference to the previously stored quantity.
    pub async fn add_sale(&self, mut sale: Sale) -> Result<MutationOutcome<Sale>> {
        let session = self.repo.session();
        session.tenant()?;
        require_counterparty(&sale.customer_id, "sale")?;
        sale.normalize(session.decimal_precision());
        if sale.quantity <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveQuantity(sale.quantity.to_string()).into());
        }

        let previous = self.sales.get(&sale.id).map(|t| t.record);
        if let Some(prev) = &previous {
            if prev.is_returned {
                return Err(ValidationError::AlreadyReturned(prev.id.to_string()).into());
            }
        }

        let prev_line = previous.as_ref().map(Sale::line);
        let next_line = sale.line();
        if !session.allow_negative_stock() {
            self.check_stock(prev_line.as_ref(), &next_line)?;
        }

        let movements = sale_movements(prev_line.as_ref(), Some(&next_line));
        let applied = self.inventory.apply(&movements, false);
        let inventory = &self.inventory;
        let outcome = optimistic_upsert(&self.repo, &self.sales, self.sink.as_ref(), sale, || {
            inventory.revert(&applied);
        })
        .await?;

        info!(id = %outcome.record().id, pending = outcome.is_pending(), "Sale saved");
        Ok(outcome)
    }

    /// Create or edit a purchase; stock grows by the quantity difference
    pub async fn add_purchase(&self, mut purchase: Purchase) -> Result<MutationOutcome<Purchase>> {
        let session = self.repo.session();
        session.tenant()?;
        require_counterparty(&purchase.supplier_id, "purchase")?;
        purchase.normalize(session.decimal_precision());
        if purchase.quantity <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveQuantity(purchase.quantity.to_string()).into());
        }

        let previous = self.purchases.get(&purchase.id).map(|t| t.record);
        if let Some(prev) = &previous {
            if prev.is_returned {
                return Err(ValidationError::AlreadyReturned(prev.id.to_string()).into());
            }
        }

        let prev_line = previous.as_ref().map(Purchase::line);
        let movements = purchase_movements(prev_line.as_ref(), Some(&purchase.line()));
        let applied = self.inventory.apply(&movements, false);
        let inventory = &self.inventory;
        let outcome = optimistic_upsert(
            &self.repo,
            &self.purchases,
            self.sink.as_ref(),
            purchase,
            || {
                inventory.revert(&applied);
            },
        )
        .await?;

        info!(id = %outcome.record().id, pending = outcome.is_pending(), "Purchase saved");
        Ok(outcome)
    }

    /// Mark a sale returned and put its quantity back in stock, once.
    pub async fn return_sale(&self, id: &RecordId) -> Result<MutationOutcome<Sale>> {
        self.repo.session().tenant()?;
        let sale = self
            .sales
            .get(id)
            .ok_or_else(|| ValidationError::NotFound(id.to_string()))?
            .record;
        if sale.is_returned {
            return Err(ValidationError::AlreadyReturned(id.to_string()).into());
        }

        let restore_at = sale.returned_at;
        self.sales.update(id, |s| {
            s.is_returned = true;
            s.returned_at = Some(Utc::now());
        });
        let applied = self
            .inventory
            .apply(&sale_movements(Some(&sale.line()), None), false);

        let result = self.repo.return_sale(id, false).await;
        let outcome = self.finish_return(&self.sales, id, result, &applied, |s| {
            s.is_returned = false;
            s.returned_at = restore_at;
        })?;
        if !outcome.is_pending() {
            log_activity(&self.repo, Table::Sales, "Returned", id).await;
        }
        Ok(outcome)
    }

    /// Mark a purchase returned and take its quantity back out of stock, once.
    pub async fn return_purchase(&self, id: &RecordId) -> Result<MutationOutcome<Purchase>> {
        self.repo.session().tenant()?;
        let purchase = self
            .purchases
            .get(id)
            .ok_or_else(|| ValidationError::NotFound(id.to_string()))?
            .record;
        if purchase.is_returned {
            return Err(ValidationError::AlreadyReturned(id.to_string()).into());
        }

        let restore_at = purchase.returned_at;
        self.purchases.update(id, |p| {
            p.is_returned = true;
            p.returned_at = Some(Utc::now());
        });
        let applied = self
            .inventory
            .apply(&purchase_movements(Some(&purchase.line()), None), false);

        let result = self.repo.return_purchase(id, false).await;
        let outcome = self.finish_return(&self.purchases, id, result, &applied, |p| {
            p.is_returned = false;
            p.returned_at = restore_at;
        })?;
        if !outcome.is_pending() {
            log_activity(&self.repo, Table::Purchases, "Returned", id).await;
        }
        Ok(outcome)
    }

    /// Delete a sale; a sale that was not returned gives its quantity back
    pub async fn delete_sale(&self, id: &RecordId) -> Result<MutationOutcome<Sale>> {
        let inventory = &self.inventory;
        optimistic_delete(
            &self.repo,
            &self.sales,
            self.sink.as_ref(),
            id,
            |sale| {
                if sale.is_returned {
                    Vec::new()
                } else {
                    inventory.apply(&sale_movements(Some(&sale.line()), None), false)
                }
            },
            |applied| {
                inventory.revert(applied);
            },
        )
        .await
    }

    pub async fn delete_purchase(&self, id: &RecordId) -> Result<MutationOutcome<Purchase>> {
        let inventory = &self.inventory;
        optimistic_delete(
            &self.repo,
            &self.purchases,
            self.sink.as_ref(),
            id,
            |purchase| {
                if purchase.is_returned {
                    Vec::new()
                } else {
                    inventory.apply(&purchase_movements(Some(&purchase.line()), None), false)
                }
            },
            |applied| {
                inventory.revert(applied);
            },
        )
        .await
    }

    pub async fn reload(&self, force_fresh: bool) -> Result<()> {
        let repo = &self.repo;
        refresh(repo, &self.customers, repo.fetch::<Customer>(force_fresh).await?)?;
        refresh(repo, &self.suppliers, repo.fetch::<Supplier>(force_fresh).await?)?;
        refresh(repo, &self.sales, repo.fetch::<Sale>(force_fresh).await?)?;
        refresh(repo, &self.purchases, repo.fetch::<Purchase>(force_fresh).await?)?;
        Ok(())
    }

    fn check_stock(&self, prev: Option<&StockLine>, next: &StockLine) -> Result<()> {
        let available = match self.inventory.available(&next.category) {
            Some(stock) => stock,
            None => return Ok(()),
        };
        // an edit within the same category may reuse what the old line took
        let reusable = prev
            .filter(|p| p.category == next.category)
            .map(|p| p.quantity)
            .unwrap_or_default();
        if available + reusable < next.quantity {
            self.sink.notify(Notice::new(
                "Insufficient stock",
                format!("Only {} of {} available", available, next.category),
                NotificationKind::Warning,
            ));
            return Err(ValidationError::InsufficientStock {
                category: next.category.clone(),
                available: available.to_string(),
                requested: next.quantity.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn finish_return<T: tally_core::Record>(
        &self,
        collection: &Collection<T>,
        id: &RecordId,
        result: Result<Persisted<()>>,
        applied: &[Movement],
        undo: impl FnOnce(&mut T),
    ) -> Result<MutationOutcome<T>> {
        match result {
            Ok(persisted) => {
                let status = if persisted.is_queued() {
                    SyncStatus::Pending
                } else {
                    SyncStatus::Confirmed
                };
                collection.set_status(id, status.clone());
                let record = collection
                    .get(id)
                    .ok_or_else(|| ValidationError::NotFound(id.to_string()))?
                    .record;
                Ok(match status {
                    SyncStatus::Pending => MutationOutcome::Pending(record),
                    _ => MutationOutcome::Confirmed(record),
                })
            }
            Err(e) => {
                collection.update(id, undo);
                self.inventory.revert(applied);
                self.sink.notify(Notice::new(
                    "Return failed",
                    e.to_string(),
                    NotificationKind::Warning,
                ));
                Err(e)
            }
        }
    }
}
