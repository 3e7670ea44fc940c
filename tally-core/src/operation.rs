/// Queued mutation model
///
/// An `Operation` is a closed set of replayable actions. A `PendingOperation`
/// is an operation that has been accepted by the durable queue and is waiting
/// to be replayed against the remote store.

use serde::{Deserialize, Serialize};

use crate::records::{
    Category, Customer, Expense, ExpenseTemplate, InlineAttachment, Notification, OpeningBalance,
    Purchase, Record, Sale, Settings, Supplier, Voucher, Waste,
};
use crate::types::{OperationId, RecordId, Table, TenantId};

/// A replayable mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    UpsertSale(Sale),
    UpsertPurchase(Purchase),
    UpsertCustomer(Customer),
    UpsertSupplier(Supplier),
    UpsertVoucher(Voucher),
    UpsertExpense(Expense),
    UpsertCategory(Category),
    UpsertWaste(Waste),
    UpsertNotification(Notification),
    UpsertExpenseTemplate(ExpenseTemplate),
    UpsertOpeningBalance(OpeningBalance),
    DeleteRecord {
        table: Table,
        id: RecordId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },
    ReturnSale {
        id: RecordId,
    },
    ReturnPurchase {
        id: RecordId,
    },
    UpdateSettings(Settings),
}

/// Expands `$body` once per upsert variant with `$r` bound to the record.
macro_rules! with_upsert {
    ($op:expr, $r:ident => $body:expr, _ => $other:expr) => {
        match $op {
            Operation::UpsertSale($r) => $body,
            Operation::UpsertPurchase($r) => $body,
            Operation::UpsertCustomer($r) => $body,
            Operation::UpsertSupplier($r) => $body,
            Operation::UpsertVoucher($r) => $body,
            Operation::UpsertExpense($r) => $body,
            Operation::UpsertCategory($r) => $body,
            Operation::UpsertWaste($r) => $body,
            Operation::UpsertNotification($r) => $body,
            Operation::UpsertExpenseTemplate($r) => $body,
            Operation::UpsertOpeningBalance($r) => $body,
            _ => $other,
        }
    };
}

impl Operation {
    /// Stable action name used in logs
    pub fn action(&self) -> &'static str {
        match self {
            Operation::UpsertSale(_) => "upsert_sale",
            Operation::UpsertPurchase(_) => "upsert_purchase",
            Operation::UpsertCustomer(_) => "upsert_customer",
            Operation::UpsertSupplier(_) => "upsert_supplier",
            Operation::UpsertVoucher(_) => "upsert_voucher",
            Operation::UpsertExpense(_) => "upsert_expense",
            Operation::UpsertCategory(_) => "upsert_category",
            Operation::UpsertWaste(_) => "upsert_waste",
            Operation::UpsertNotification(_) => "upsert_notification",
            Operation::UpsertExpenseTemplate(_) => "upsert_expense_template",
            Operation::UpsertOpeningBalance(_) => "upsert_opening_balance",
            Operation::DeleteRecord { .. } => "delete_record",
            Operation::ReturnSale { .. } => "return_sale",
            Operation::ReturnPurchase { .. } => "return_purchase",
            Operation::UpdateSettings(_) => "update_settings",
        }
    }

    /// Table the operation writes to
    pub fn table(&self) -> Table {
        match self {
            Operation::UpsertSale(_) | Operation::ReturnSale { .. } => Table::Sales,
            Operation::UpsertPurchase(_) | Operation::ReturnPurchase { .. } => Table::Purchases,
            Operation::UpsertCustomer(_) => Table::Customers,
            Operation::UpsertSupplier(_) => Table::Suppliers,
            Operation::UpsertVoucher(_) => Table::Vouchers,
            Operation::UpsertExpense(_) => Table::Expenses,
            Operation::UpsertCategory(_) => Table::Categories,
            Operation::UpsertWaste(_) => Table::Waste,
            Operation::UpsertNotification(_) => Table::Notifications,
            Operation::UpsertExpenseTemplate(_) => Table::ExpenseTemplates,
            Operation::UpsertOpeningBalance(_) => Table::OpeningBalances,
            Operation::DeleteRecord { table, .. } => *table,
            Operation::UpdateSettings(_) => Table::UserSettings,
        }
    }

    /// Identity of the targeted record; `None` for tenant-keyed settings
    pub fn record_id(&self) -> Option<&RecordId> {
        with_upsert!(self, r => Some(r.id()), _ => match self {
            Operation::DeleteRecord { id, .. }
            | Operation::ReturnSale { id }
            | Operation::ReturnPurchase { id } => Some(id),
            _ => None,
        })
    }

    /// Key identifying the targeted record across tables.
    ///
    /// Two operations with the same key must be applied in queue order.
    pub fn record_key(&self, tenant: &TenantId) -> String {
        match self.record_id() {
            Some(id) => format!("{}:{}", self.table(), id),
            None => format!("{}:{}", self.table(), tenant),
        }
    }

    pub fn pending_attachment(&self) -> Option<&InlineAttachment> {
        with_upsert!(self, r => r.pending_attachment(), _ => None)
    }

    /// Replace the inline attachment with its uploaded reference
    pub fn resolve_attachment(&mut self, url: String) {
        with_upsert!(self, r => {
            r.take_pending_attachment();
            r.set_image_url(url);
        }, _ => {})
    }

    /// Strip server-assigned fields before the operation is queued
    pub fn clear_timestamps(&mut self) {
        with_upsert!(self, r => r.clear_timestamps(), _ => {})
    }
}

/// An operation submitted to the queue; the store assigns identity and order
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDraft {
    pub tenant_id: TenantId,
    pub temp_id: Option<RecordId>,
    pub original_id: Option<RecordId>,
    pub operation: Operation,
}

impl OperationDraft {
    pub fn new(tenant_id: TenantId, operation: Operation) -> Self {
        let temp_id = operation.record_id().cloned();
        Self {
            tenant_id,
            temp_id,
            original_id: None,
            operation,
        }
    }

    pub fn with_original_id(mut self, id: RecordId) -> Self {
        self.original_id = Some(id);
        self
    }
}

/// An accepted, not yet applied queue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub tenant_id: TenantId,
    pub sequence: u64,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<RecordId>,
    pub operation: Operation,
}

impl PendingOperation {
    pub fn from_draft(draft: OperationDraft, sequence: u64, created_at: i64) -> Self {
        Self {
            id: OperationId::new(),
            tenant_id: draft.tenant_id,
            sequence,
            created_at,
            temp_id: draft.temp_id,
            original_id: draft.original_id,
            operation: draft.operation,
        }
    }

    pub fn record_key(&self) -> String {
        self.operation.record_key(&self.tenant_id)
    }

    /// Identifier used for the attachment upload folder
    pub fn attachment_owner(&self) -> String {
        self.temp_id
            .as_ref()
            .or(self.original_id.as_ref())
            .map(|id| id.to_string())
            .unwrap_or_else(|| "offline".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Currency, PaymentStatus};
    use rust_decimal_macros::dec;

    fn sale() -> Sale {
        Sale::new(
            RecordId::from_str("cust-1"),
            "Ali",
            "Sabri",
            dec!(2),
            dec!(1500),
            PaymentStatus::Credit,
            Currency::YER,
        )
    }

    #[test]
    fn test_operation_tagging() {
        let op = Operation::ReturnSale {
            id: RecordId::from_str("s1"),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["action"], "return_sale");
        assert_eq!(json["payload"]["id"], "s1");

        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_record_key_groups_by_target() {
        let tenant = TenantId::from_str("t1");
        let s = sale();
        let id = s.id.clone();
        let upsert = Operation::UpsertSale(s);
        let ret = Operation::ReturnSale { id: id.clone() };
        let del = Operation::DeleteRecord {
            table: Table::Sales,
            id,
            image_url: None,
        };
        assert_eq!(upsert.record_key(&tenant), ret.record_key(&tenant));
        assert_eq!(upsert.record_key(&tenant), del.record_key(&tenant));

        let settings = Operation::UpdateSettings(Settings::default());
        assert_eq!(settings.record_key(&tenant), "user_settings:t1");
    }

    #[test]
    fn test_resolve_attachment() {
        let mut s = sale();
        s.pending_image = Some(InlineAttachment::new(vec![7; 4], "image/png", "r.png"));
        let mut op = Operation::UpsertSale(s);
        assert!(op.pending_attachment().is_some());

        op.resolve_attachment("https://blobs/t1/sales/x/r.png".into());
        assert!(op.pending_attachment().is_none());
        match op {
            Operation::UpsertSale(s) => {
                assert_eq!(s.image_url.as_deref(), Some("https://blobs/t1/sales/x/r.png"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_attachment_owner_fallback() {
        let draft = OperationDraft {
            tenant_id: TenantId::from_str("t1"),
            temp_id: None,
            original_id: None,
            operation: Operation::UpdateSettings(Settings::default()),
        };
        let pending = PendingOperation::from_draft(draft, 1, 0);
        assert_eq!(pending.attachment_owner(), "offline");
    }
}
