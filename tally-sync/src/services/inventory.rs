use rust_decimal::Decimal;
use std::sync::Arc;
use tally_core::ledger::{apply_movement, Movement, StockReplay};
use tally_core::records::{Category, Purchase, Sale, Waste};
use tally_core::{Operation, RecordId, Result, ValidationError};
use tracing::debug;

use super::{optimistic_delete, optimistic_upsert, refresh, SharedSink};
use crate::repository::Repository;
use crate::state::{Collection, MutationOutcome, Tracked};

/// Inventory categories and their in-memory stock levels.
///
/// Stock changes caused by sales, purchases and waste are applied here
/// optimistically. The remote store keeps its own authoritative stock; a
/// reload takes it and re-applies whatever is still queued.
pub struct InventoryService {
    repo: Arc<Repository>,
    sink: SharedSink,
    categories: Collection<Category>,
}

impl InventoryService {
    pub fn new(repo: Arc<Repository>, sink: SharedSink) -> Self {
        Self {
            repo,
            sink,
            categories: Collection::new(),
        }
    }

    pub fn categories(&self) -> &Collection<Category> {
        &self.categories
    }

    /// Current stock of the category named `name`
    pub fn available(&self, name: &str) -> Option<Decimal> {
        self.categories
            .records()
            .into_iter()
            .find(|c| c.name == name)
            .map(|c| c.stock)
    }

    pub async fn save_category(&self, category: Category) -> Result<MutationOutcome<Category>> {
        self.repo.session().tenant()?;
        if category.name.trim().is_empty() {
            return Err(ValidationError::Invalid("category name is required".into()).into());
        }
        optimistic_upsert(&self.repo, &self.categories, self.sink.as_ref(), category, || {}).await
    }

    pub async fn delete_category(&self, id: &RecordId) -> Result<MutationOutcome<Category>> {
        optimistic_delete(
            &self.repo,
            &self.categories,
            self.sink.as_ref(),
            id,
            |_| Vec::new(),
            |_| {},
        )
        .await
    }

    /// Apply movements to the matching categories.
    ///
    /// Returns what was actually applied, which is what `revert` needs to
    /// undo them exactly. Movements for unknown categories are skipped.
    pub fn apply(&self, movements: &[Movement], floor_at_zero: bool) -> Vec<Movement> {
        let mut applied = Vec::with_capacity(movements.len());
        for m in movements {
            let id = match self.category_id(&m.category) {
                Some(id) => id,
                None => continue,
            };
            let mut actual = Decimal::ZERO;
            self.categories.update(&id, |c| {
                let (next, delta) = apply_movement(c.stock, m.delta, floor_at_zero);
                c.stock = next;
                actual = delta;
            });
            debug!(category = %m.category, requested = %m.delta, applied = %actual, "Stock moved");
            applied.push(Movement {
                category: m.category.clone(),
                delta: actual,
            });
        }
        applied
    }

    /// Undo movements previously returned by `apply`; returns what was applied
    pub fn revert(&self, applied: &[Movement]) -> Vec<Movement> {
        let inverse: Vec<Movement> = applied.iter().rev().map(Movement::inverse).collect();
        self.apply(&inverse, false)
    }

    /// Refresh categories, then put back what queued operations owe them.
    ///
    /// Queued category upserts replace the fetched row at their place in the
    /// queue; queued sales, purchases and waste move stock relative to the
    /// fetched source records, which are read through the cache.
    pub async fn reload(&self, force_fresh: bool) -> Result<()> {
        let fetched = self.repo.fetch::<Category>(force_fresh).await?;
        refresh(&self.repo, &self.categories, fetched)?;

        let queued = self.repo.tenant_operations()?;
        if queued.is_empty() {
            return Ok(());
        }
        let sales = self.repo.fetch::<Sale>(false).await?;
        let purchases = self.repo.fetch::<Purchase>(false).await?;
        let waste = self.repo.fetch::<Waste>(false).await?;

        let mut replay = StockReplay::new(&sales, &purchases, &waste);
        for op in &queued {
            if let Operation::UpsertCategory(category) = &op.operation {
                self.categories.upsert(Tracked::pending(category.clone()));
                continue;
            }
            let (movements, floor_at_zero) = replay.movements(&op.operation);
            if !movements.is_empty() {
                self.apply(&movements, floor_at_zero);
            }
        }
        debug!(queued = queued.len(), "Replayed queued stock movements");
        Ok(())
    }

    fn category_id(&self, name: &str) -> Option<RecordId> {
        self.categories
            .records()
            .into_iter()
            .find(|c| c.name == name)
            .map(|c| c.id)
    }
}
