//! Portable backup of a tenant's data
//!
//! A package is a plain JSON document holding every collection the engine
//! keeps, plus the tenant settings. Restoring writes rows back table by table
//! in chunks, parents before the records that reference them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::records::{
    Category, Customer, Expense, ExpenseTemplate, Notification, OpeningBalance, Purchase, Sale,
    Settings, Supplier, Voucher, Waste,
};
use crate::types::{Table, TenantId};
use crate::Result;

/// Rows written per remote call while restoring
pub const RESTORE_CHUNK_SIZE: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub app: String,
    pub version: String,
}

impl Default for BackupMetadata {
    fn default() -> Self {
        Self {
            app: "Tally".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPackage {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BackupMetadata,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub customers: Vec<Customer>,
    #[serde(default)]
    pub suppliers: Vec<Supplier>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub sales: Vec<Sale>,
    #[serde(default)]
    pub purchases: Vec<Purchase>,
    #[serde(default)]
    pub vouchers: Vec<Voucher>,
    #[serde(default)]
    pub expenses: Vec<Expense>,
    #[serde(default)]
    pub waste: Vec<Waste>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub expense_templates: Vec<ExpenseTemplate>,
    #[serde(default)]
    pub opening_balances: Vec<OpeningBalance>,
}

impl BackupPackage {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            metadata: BackupMetadata::default(),
            settings: Settings::default(),
            customers: Vec::new(),
            suppliers: Vec::new(),
            categories: Vec::new(),
            sales: Vec::new(),
            purchases: Vec::new(),
            vouchers: Vec::new(),
            expenses: Vec::new(),
            waste: Vec::new(),
            notifications: Vec::new(),
            expense_templates: Vec::new(),
            opening_balances: Vec::new(),
        }
    }

    /// Number of records across all collections
    pub fn len(&self) -> usize {
        self.customers.len()
            + self.suppliers.len()
            + self.categories.len()
            + self.sales.len()
            + self.purchases.len()
            + self.vouchers.len()
            + self.expenses.len()
            + self.waste.len()
            + self.notifications.len()
            + self.expense_templates.len()
            + self.opening_balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows to write back, per table in restore order, owned by `tenant`.
    ///
    /// Notifications are not restored. Tables with nothing to restore are
    /// left out.
    pub fn restore_rows(&self, tenant: &TenantId) -> Result<Vec<(Table, Vec<Value>)>> {
        let tables = vec![
            (Table::Customers, rows(&self.customers, tenant)?),
            (Table::Suppliers, rows(&self.suppliers, tenant)?),
            (Table::Categories, rows(&self.categories, tenant)?),
            (Table::Sales, rows(&self.sales, tenant)?),
            (Table::Purchases, rows(&self.purchases, tenant)?),
            (Table::Vouchers, rows(&self.vouchers, tenant)?),
            (Table::Expenses, rows(&self.expenses, tenant)?),
            (Table::Waste, rows(&self.waste, tenant)?),
            (Table::ExpenseTemplates, rows(&self.expense_templates, tenant)?),
            (Table::OpeningBalances, rows(&self.opening_balances, tenant)?),
        ];
        Ok(tables.into_iter().filter(|(_, rows)| !rows.is_empty()).collect())
    }
}

/// Serialize records as rows of `tenant`, dropping inline attachments and
/// server-assigned timestamps.
fn rows<T: Serialize>(records: &[T], tenant: &TenantId) -> Result<Vec<Value>> {
    records
        .iter()
        .map(|record| {
            let mut row = serde_json::to_value(record)?;
            if let Value::Object(map) = &mut row {
                for field in ["pending_image", "created_at", "updated_at"] {
                    map.remove(field);
                }
                map.insert("user_id".into(), Value::String(tenant.to_string()));
            }
            Ok(row)
        })
        .collect()
}
