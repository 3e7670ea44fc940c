/// Stock and balance arithmetic
///
/// Stock movements are computed by diffing the previously stored line of a
/// source record against its new line. Applying the resulting movements on
/// every create, edit, return, or delete leaves the category holding exactly
/// the latest quantity's effect, however many times the record was edited.
///
/// Balances are never stored; they are derived from the full transaction
/// history each time they are requested.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::operation::Operation;
use crate::records::{Customer, Expense, Purchase, Sale, Supplier, Voucher, Waste};
use crate::types::{Currency, PaymentStatus, RecordId, Table, VoucherKind};

/// Quantity a source record takes from (or adds to) one category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLine {
    pub category: String,
    pub quantity: Decimal,
}

impl StockLine {
    pub fn new(category: &str, quantity: Decimal) -> Self {
        Self {
            category: category.to_string(),
            quantity,
        }
    }
}

/// Signed change to one category's stock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movement {
    pub category: String,
    pub delta: Decimal,
}

impl Movement {
    pub fn inverse(&self) -> Movement {
        Movement {
            category: self.category.clone(),
            delta: -self.delta,
        }
    }
}

fn diff(prev: Option<&StockLine>, next: Option<&StockLine>, sign: Decimal) -> Vec<Movement> {
    let mut out = Vec::with_capacity(2);
    match (prev, next) {
        (Some(p), Some(n)) if p.category == n.category => {
            let delta = sign * (n.quantity - p.quantity);
            if !delta.is_zero() {
                out.push(Movement {
                    category: n.category.clone(),
                    delta,
                });
            }
        }
        (p, n) => {
            if let Some(p) = p {
                out.push(Movement {
                    category: p.category.clone(),
                    delta: -sign * p.quantity,
                });
            }
            if let Some(n) = n {
                out.push(Movement {
                    category: n.category.clone(),
                    delta: sign * n.quantity,
                });
            }
        }
    }
    out.retain(|m| !m.delta.is_zero());
    out
}

/// Movements for a sale going from `prev` to `next`.
///
/// `prev = None` is a create, `next = None` is a return or delete.
pub fn sale_movements(prev: Option<&StockLine>, next: Option<&StockLine>) -> Vec<Movement> {
    diff(prev, next, Decimal::NEGATIVE_ONE)
}

pub fn purchase_movements(prev: Option<&StockLine>, next: Option<&StockLine>) -> Vec<Movement> {
    diff(prev, next, Decimal::ONE)
}

/// Waste consumes stock like a sale; apply with `floor_at_zero`.
pub fn waste_movements(prev: Option<&StockLine>, next: Option<&StockLine>) -> Vec<Movement> {
    diff(prev, next, Decimal::NEGATIVE_ONE)
}

/// Apply a delta to a stock level.
///
/// Returns the new stock and the delta that was actually applied, which
/// differs from `delta` only when the zero floor clipped it.
pub fn apply_movement(stock: Decimal, delta: Decimal, floor_at_zero: bool) -> (Decimal, Decimal) {
    let mut next = stock + delta;
    if floor_at_zero && next < Decimal::ZERO {
        next = Decimal::ZERO;
    }
    (next, next - stock)
}

/// Replays queued operations over fetched source records.
///
/// Fetched category stock only reflects what the remote store accepted.
/// Feeding the queue through `movements` in order yields what the still
/// queued sales, purchases and waste owe on top of it. A returned or deleted
/// record holds no line.
#[derive(Debug, Default)]
pub struct StockReplay {
    sales: HashMap<RecordId, Option<StockLine>>,
    purchases: HashMap<RecordId, Option<StockLine>>,
    waste: HashMap<RecordId, StockLine>,
}

fn held(returned: bool, line: StockLine) -> Option<StockLine> {
    if returned {
        None
    } else {
        Some(line)
    }
}

impl StockReplay {
    pub fn new(sales: &[Sale], purchases: &[Purchase], waste: &[Waste]) -> Self {
        Self {
            sales: sales
                .iter()
                .map(|s| (s.id.clone(), held(s.is_returned, s.line())))
                .collect(),
            purchases: purchases
                .iter()
                .map(|p| (p.id.clone(), held(p.is_returned, p.line())))
                .collect(),
            waste: waste.iter().map(|w| (w.id.clone(), w.line())).collect(),
        }
    }

    /// Movements `op` owes after everything replayed before it, and whether
    /// they are floored at zero.
    pub fn movements(&mut self, op: &Operation) -> (Vec<Movement>, bool) {
        match op {
            Operation::UpsertSale(sale) => {
                let next = held(sale.is_returned, sale.line());
                let prev = self.sales.insert(sale.id.clone(), next.clone()).flatten();
                (sale_movements(prev.as_ref(), next.as_ref()), false)
            }
            Operation::ReturnSale { id } => {
                let prev = self.sales.get_mut(id).and_then(Option::take);
                (sale_movements(prev.as_ref(), None), false)
            }
            Operation::UpsertPurchase(purchase) => {
                let next = held(purchase.is_returned, purchase.line());
                let prev = self
                    .purchases
                    .insert(purchase.id.clone(), next.clone())
                    .flatten();
                (purchase_movements(prev.as_ref(), next.as_ref()), false)
            }
            Operation::ReturnPurchase { id } => {
                let prev = self.purchases.get_mut(id).and_then(Option::take);
                (purchase_movements(prev.as_ref(), None), false)
            }
            Operation::UpsertWaste(waste) => {
                let next = waste.line();
                let prev = self.waste.insert(waste.id.clone(), next.clone());
                (waste_movements(prev.as_ref(), Some(&next)), true)
            }
            Operation::DeleteRecord { table, id, .. } => match table {
                Table::Sales => {
                    let prev = self.sales.remove(id).flatten();
                    (sale_movements(prev.as_ref(), None), false)
                }
                Table::Purchases => {
                    let prev = self.purchases.remove(id).flatten();
                    (purchase_movements(prev.as_ref(), None), false)
                }
                Table::Waste => {
                    let prev = self.waste.remove(id);
                    (waste_movements(prev.as_ref(), None), false)
                }
                _ => (Vec::new(), false),
            },
            _ => (Vec::new(), false),
        }
    }
}

/// Derived balance of one counterparty in one currency
#[derive(Debug, Clone, PartialEq)]
pub struct AccountBalance {
    pub currency: Currency,
    /// Positive means the counterparty owes us (customer) or we owe them (supplier)
    pub amount: Decimal,
    pub last_activity: Option<DateTime<Utc>>,
    pub pending_count: usize,
}

fn latest(dates: impl Iterator<Item = DateTime<Utc>>) -> Option<DateTime<Utc>> {
    dates.max()
}

/// Credit sales not yet returned minus receipt vouchers, per currency
pub fn customer_balances(
    customer_id: &RecordId,
    sales: &[Sale],
    vouchers: &[Voucher],
) -> Vec<AccountBalance> {
    Currency::ALL
        .iter()
        .map(|&currency| {
            let open: Vec<&Sale> = sales
                .iter()
                .filter(|s| &s.customer_id == customer_id && s.currency == currency && !s.is_returned)
                .collect();
            let credit: Vec<&&Sale> = open
                .iter()
                .filter(|s| s.status == PaymentStatus::Credit)
                .collect();
            let debt: Decimal = credit.iter().map(|s| s.total).sum();
            let receipts: Decimal = vouchers
                .iter()
                .filter(|v| {
                    &v.person_id == customer_id
                        && v.kind == VoucherKind::Receipt
                        && v.currency == currency
                })
                .map(|v| v.amount)
                .sum();
            let last_activity = latest(
                open.iter().map(|s| s.date).chain(
                    vouchers
                        .iter()
                        .filter(|v| &v.person_id == customer_id)
                        .map(|v| v.date),
                ),
            );
            AccountBalance {
                currency,
                amount: debt - receipts,
                last_activity,
                pending_count: credit.len(),
            }
        })
        .collect()
}

/// Credit purchases not yet returned minus payment vouchers, per currency
pub fn supplier_balances(
    supplier_id: &RecordId,
    purchases: &[Purchase],
    vouchers: &[Voucher],
) -> Vec<AccountBalance> {
    Currency::ALL
        .iter()
        .map(|&currency| {
            let open: Vec<&Purchase> = purchases
                .iter()
                .filter(|p| &p.supplier_id == supplier_id && p.currency == currency && !p.is_returned)
                .collect();
            let credit: Vec<&&Purchase> = open
                .iter()
                .filter(|p| p.status == PaymentStatus::Credit)
                .collect();
            let debt: Decimal = credit.iter().map(|p| p.total).sum();
            let payments: Decimal = vouchers
                .iter()
                .filter(|v| {
                    &v.person_id == supplier_id
                        && v.kind == VoucherKind::Payment
                        && v.currency == currency
                })
                .map(|v| v.amount)
                .sum();
            let last_activity = latest(
                open.iter().map(|p| p.date).chain(
                    vouchers
                        .iter()
                        .filter(|v| &v.person_id == supplier_id)
                        .map(|v| v.date),
                ),
            );
            AccountBalance {
                currency,
                amount: debt - payments,
                last_activity,
                pending_count: credit.len(),
            }
        })
        .collect()
}

/// Tenant-wide position in one currency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetSummary {
    pub currency: Currency,
    pub assets: Decimal,
    pub liabilities: Decimal,
    pub cash: Decimal,
    pub net: Decimal,
}

/// Full-history views the summary is derived from
pub struct LedgerView<'a> {
    pub customers: &'a [Customer],
    pub suppliers: &'a [Supplier],
    pub sales: &'a [Sale],
    pub purchases: &'a [Purchase],
    pub vouchers: &'a [Voucher],
    pub expenses: &'a [Expense],
}

pub fn budget_summary(view: &LedgerView<'_>) -> Vec<BudgetSummary> {
    Currency::ALL
        .iter()
        .map(|&currency| {
            let mut assets = Decimal::ZERO;
            let mut liabilities = Decimal::ZERO;

            for c in view.customers {
                let bal = balance_in(customer_balances(&c.id, view.sales, view.vouchers), currency);
                if bal > Decimal::ZERO {
                    assets += bal;
                } else {
                    liabilities += bal.abs();
                }
            }
            for s in view.suppliers {
                let bal =
                    balance_in(supplier_balances(&s.id, view.purchases, view.vouchers), currency);
                if bal > Decimal::ZERO {
                    liabilities += bal;
                } else {
                    assets += bal.abs();
                }
            }

            let cash_sales: Decimal = view
                .sales
                .iter()
                .filter(|s| s.status == PaymentStatus::Cash && s.currency == currency && !s.is_returned)
                .map(|s| s.total)
                .sum();
            let cash_purchases: Decimal = view
                .purchases
                .iter()
                .filter(|p| p.status == PaymentStatus::Cash && p.currency == currency && !p.is_returned)
                .map(|p| p.total)
                .sum();
            let receipts = voucher_total(view.vouchers, VoucherKind::Receipt, currency);
            let payments = voucher_total(view.vouchers, VoucherKind::Payment, currency);
            let expenses: Decimal = view
                .expenses
                .iter()
                .filter(|e| e.currency == currency)
                .map(|e| e.amount)
                .sum();

            let cash = (cash_sales + receipts) - (cash_purchases + payments + expenses);
            BudgetSummary {
                currency,
                assets,
                liabilities,
                cash,
                net: cash + assets - liabilities,
            }
        })
        .collect()
}

fn balance_in(balances: Vec<AccountBalance>, currency: Currency) -> Decimal {
    balances
        .into_iter()
        .find(|b| b.currency == currency)
        .map(|b| b.amount)
        .unwrap_or_default()
}

fn voucher_total(vouchers: &[Voucher], kind: VoucherKind, currency: Currency) -> Decimal {
    vouchers
        .iter()
        .filter(|v| v.kind == kind && v.currency == currency)
        .map(|v| v.amount)
        .sum()
}
