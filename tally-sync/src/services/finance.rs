use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tally_core::ledger::{
    budget_summary, customer_balances, supplier_balances, waste_movements, AccountBalance,
    BudgetSummary, LedgerView, Movement,
};
use tally_core::records::{
    ActivityKind, ExchangeRates, Expense, ExpenseTemplate, OpeningBalance, Settings, Voucher,
    VoucherEdit, Waste,
};
use tally_core::{RecordId, Result, ValidationError};

use super::{
    optimistic_delete, optimistic_upsert, refresh, require_counterparty, BusinessService,
    InventoryService, SharedSink,
};
use crate::repository::Repository;
use crate::state::{Collection, MutationOutcome};

fn require_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount(amount.to_string()).into());
    }
    Ok(())
}

/// Vouchers, expenses, waste, templates, opening balances and settings.
///
/// Waste deductions are floored at zero, so the amount actually taken from
/// stock is remembered per record and given back exactly on edit or delete.
pub struct FinanceService {
    repo: Arc<Repository>,
    inventory: Arc<InventoryService>,
    business: Arc<BusinessService>,
    sink: SharedSink,
    vouchers: Collection<Voucher>,
    expenses: Collection<Expense>,
    waste: Collection<Waste>,
    expense_templates: Collection<ExpenseTemplate>,
    opening_balances: Collection<OpeningBalance>,
    waste_applied: Mutex<HashMap<RecordId, Vec<Movement>>>,
}

impl FinanceService {
    pub fn new(
        repo: Arc<Repository>,
        inventory: Arc<InventoryService>,
        business: Arc<BusinessService>,
        sink: SharedSink,
    ) -> Self {
        Self {
            repo,
            inventory,
            business,
            sink,
            vouchers: Collection::new(),
            expenses: Collection::new(),
            waste: Collection::new(),
            expense_templates: Collection::new(),
            opening_balances: Collection::new(),
            waste_applied: Mutex::new(HashMap::new()),
        }
    }

    pub fn vouchers(&self) -> &Collection<Voucher> {
        &self.vouchers
    }

    pub fn expenses(&self) -> &Collection<Expense> {
        &self.expenses
    }

    pub fn waste(&self) -> &Collection<Waste> {
        &self.waste
    }

    pub fn expense_templates(&self) -> &Collection<ExpenseTemplate> {
        &self.expense_templates
    }

    pub fn opening_balances(&self) -> &Collection<OpeningBalance> {
        &self.opening_balances
    }

    /// Create or edit a voucher. Edits keep the replaced amount and notes.
    pub async fn add_voucher(&self, mut voucher: Voucher) -> Result<MutationOutcome<Voucher>> {
        let session = self.repo.session();
        session.tenant()?;
        require_counterparty(&voucher.person_id, "voucher")?;
        voucher.amount = voucher.amount.round_dp(session.decimal_precision());
        require_positive(voucher.amount)?;

        if let Some(prev) = self.vouchers.get(&voucher.id).map(|t| t.record) {
            if prev.amount != voucher.amount || prev.notes != voucher.notes {
                voucher.edit_history = prev.edit_history.clone();
                voucher.edit_history.push(VoucherEdit {
                    date: Utc::now(),
                    previous_amount: prev.amount,
                    previous_notes: prev.notes,
                });
            }
        }
        optimistic_upsert(&self.repo, &self.vouchers, self.sink.as_ref(), voucher, || {}).await
    }

    pub async fn delete_voucher(&self, id: &RecordId) -> Result<MutationOutcome<Voucher>> {
        optimistic_delete(&self.repo, &self.vouchers, self.sink.as_ref(), id, |_| Vec::new(), |_| {})
            .await
    }

    pub async fn add_expense(&self, mut expense: Expense) -> Result<MutationOutcome<Expense>> {
        let session = self.repo.session();
        session.tenant()?;
        expense.amount = expense.amount.round_dp(session.decimal_precision());
        require_positive(expense.amount)?;
        optimistic_upsert(&self.repo, &self.expenses, self.sink.as_ref(), expense, || {}).await
    }

    pub async fn delete_expense(&self, id: &RecordId) -> Result<MutationOutcome<Expense>> {
        optimistic_delete(&self.repo, &self.expenses, self.sink.as_ref(), id, |_| Vec::new(), |_| {})
            .await
    }

    /// Record or edit a waste entry. Stock never goes below zero.
    pub async fn add_waste(&self, waste: Waste) -> Result<MutationOutcome<Waste>> {
        self.repo.session().tenant()?;
        if waste.quantity <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveQuantity(waste.quantity.to_string()).into());
        }

        let id = waste.id.clone();
        let prior = self.take_applied(&id);
        if let Some(prior) = &prior {
            self.inventory.revert(prior);
        }
        let applied = self
            .inventory
            .apply(&waste_movements(None, Some(&waste.line())), true);
        self.waste_applied.lock().insert(id.clone(), applied.clone());

        let inventory = &self.inventory;
        let waste_applied = &self.waste_applied;
        optimistic_upsert(&self.repo, &self.waste, self.sink.as_ref(), waste, || {
            inventory.revert(&applied);
            let mut map = waste_applied.lock();
            match prior {
                Some(prior) => {
                    inventory.apply(&prior, false);
                    map.insert(id, prior);
                }
                None => {
                    map.remove(&id);
                }
            }
        })
        .await
    }

    /// Delete a waste entry and give back what it actually took from stock
    pub async fn delete_waste(&self, id: &RecordId) -> Result<MutationOutcome<Waste>> {
        let inventory = &self.inventory;
        let waste_applied = &self.waste_applied;
        optimistic_delete(
            &self.repo,
            &self.waste,
            self.sink.as_ref(),
            id,
            |waste| {
                let prior = waste_applied
                    .lock()
                    .remove(&waste.id)
                    .unwrap_or_else(|| waste_movements(None, Some(&waste.line())));
                let restored = inventory.revert(&prior);
                waste_applied.lock().insert(waste.id.clone(), prior);
                restored
            },
            |restored| {
                inventory.revert(restored);
            },
        )
        .await
        .map(|outcome| {
            self.waste_applied.lock().remove(id);
            outcome
        })
    }

    pub async fn save_expense_template(
        &self,
        template: ExpenseTemplate,
    ) -> Result<MutationOutcome<ExpenseTemplate>> {
        self.repo.session().tenant()?;
        require_positive(template.amount)?;
        optimistic_upsert(
            &self.repo,
            &self.expense_templates,
            self.sink.as_ref(),
            template,
            || {},
        )
        .await
    }

    pub async fn delete_expense_template(
        &self,
        id: &RecordId,
    ) -> Result<MutationOutcome<ExpenseTemplate>> {
        optimistic_delete(
            &self.repo,
            &self.expense_templates,
            self.sink.as_ref(),
            id,
            |_| Vec::new(),
            |_| {},
        )
        .await
    }

    /// Record an expense from a template, dated now
    pub async fn apply_expense_template(&self, id: &RecordId) -> Result<MutationOutcome<Expense>> {
        let template = self
            .expense_templates
            .get(id)
            .ok_or_else(|| ValidationError::NotFound(id.to_string()))?
            .record;
        let expense = Expense::new(
            template.title,
            template.category,
            template.amount,
            template.currency,
        );
        self.add_expense(expense).await
    }

    pub async fn save_opening_balance(
        &self,
        balance: OpeningBalance,
    ) -> Result<MutationOutcome<OpeningBalance>> {
        self.repo.session().tenant()?;
        require_counterparty(&balance.person_id, "opening balance")?;
        require_positive(balance.amount)?;
        optimistic_upsert(
            &self.repo,
            &self.opening_balances,
            self.sink.as_ref(),
            balance,
            || {},
        )
        .await
    }

    pub async fn delete_opening_balance(
        &self,
        id: &RecordId,
    ) -> Result<MutationOutcome<OpeningBalance>> {
        optimistic_delete(
            &self.repo,
            &self.opening_balances,
            self.sink.as_ref(),
            id,
            |_| Vec::new(),
            |_| {},
        )
        .await
    }

    /// Replace the tenant's settings; the session sees them immediately.
    pub async fn update_settings(&self, settings: Settings) -> Result<MutationOutcome<Settings>> {
        let session = self.repo.session();
        session.tenant()?;
        let previous = session.settings();
        session.set_settings(settings.clone());

        match self.repo.update_settings(settings, false).await {
            Ok(persisted) => {
                if !persisted.is_queued() {
                    self.repo
                        .log_activity(ActivityKind::Settings, "Updated settings", "user_settings")
                        .await;
                }
                Ok(persisted.into())
            }
            Err(e) => {
                session.set_settings(previous);
                Err(e)
            }
        }
    }

    pub async fn update_exchange_rates(
        &self,
        rates: ExchangeRates,
    ) -> Result<MutationOutcome<Settings>> {
        if rates.sar_to_yer <= Decimal::ZERO || rates.omr_to_yer <= Decimal::ZERO {
            return Err(ValidationError::Invalid("exchange rates must be positive".into()).into());
        }
        let mut settings = self.repo.session().settings();
        settings.exchange_rates = rates;
        self.update_settings(settings).await
    }

    pub fn customer_balances(&self, customer_id: &RecordId) -> Vec<AccountBalance> {
        customer_balances(
            customer_id,
            &self.business.sales().records(),
            &self.vouchers.records(),
        )
    }

    pub fn supplier_balances(&self, supplier_id: &RecordId) -> Vec<AccountBalance> {
        supplier_balances(
            supplier_id,
            &self.business.purchases().records(),
            &self.vouchers.records(),
        )
    }

    pub fn budget_summary(&self) -> Vec<BudgetSummary> {
        let customers = self.business.customers().records();
        let suppliers = self.business.suppliers().records();
        let sales = self.business.sales().records();
        let purchases = self.business.purchases().records();
        let vouchers = self.vouchers.records();
        let expenses = self.expenses.records();
        budget_summary(&LedgerView {
            customers: &customers,
            suppliers: &suppliers,
            sales: &sales,
            purchases: &purchases,
            vouchers: &vouchers,
            expenses: &expenses,
        })
    }

    pub async fn reload(&self, force_fresh: bool) -> Result<()> {
        let repo = &self.repo;
        refresh(repo, &self.vouchers, repo.fetch::<Voucher>(force_fresh).await?)?;
        refresh(repo, &self.expenses, repo.fetch::<Expense>(force_fresh).await?)?;
        refresh(repo, &self.waste, repo.fetch::<Waste>(force_fresh).await?)?;
        refresh(
            repo,
            &self.expense_templates,
            repo.fetch::<ExpenseTemplate>(force_fresh).await?,
        )?;
        refresh(
            repo,
            &self.opening_balances,
            repo.fetch::<OpeningBalance>(force_fresh).await?,
        )?;
        repo.fetch_settings(force_fresh).await?;
        Ok(())
    }

    fn take_applied(&self, id: &RecordId) -> Option<Vec<Movement>> {
        let known = self.waste_applied.lock().remove(id);
        known.or_else(|| {
            self.waste
                .get(id)
                .map(|t| waste_movements(None, Some(&t.record.line())))
        })
    }
}
