/// Canonical record types persisted to the remote store
///
/// Every record carries a client-generated identity and the owning tenant.
/// Field names follow the remote row layout so a record serializes directly
/// into the row the remote store expects.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::ledger::StockLine;
use crate::operation::Operation;
use crate::types::{Currency, PaymentStatus, PersonKind, RecordId, Table, TenantId, VoucherKind};

/// Common behavior of every entity the repository persists.
pub trait Record:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const TABLE: Table;

    fn id(&self) -> &RecordId;
    fn set_id(&mut self, id: RecordId);
    fn set_tenant(&mut self, tenant: TenantId);

    /// Drop timestamps the remote store assigns itself
    fn clear_timestamps(&mut self);

    /// Wrap the record in the upsert variant of `Operation`
    fn into_upsert(self) -> Operation;

    fn pending_attachment(&self) -> Option<&InlineAttachment> {
        None
    }

    fn take_pending_attachment(&mut self) -> Option<InlineAttachment> {
        None
    }

    fn image_url(&self) -> Option<&str> {
        None
    }

    fn set_image_url(&mut self, _url: String) {}
}

/// Binary attachment captured offline, uploaded by the drainer before replay
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineAttachment {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub media_type: String,
    pub file_name: String,
}

impl InlineAttachment {
    pub fn new(data: Vec<u8>, media_type: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            data,
            media_type: media_type.into(),
            file_name: file_name.into(),
        }
    }

    /// Decode a base64 payload, with or without a `data:` URL prefix.
    pub fn from_base64(
        encoded: &str,
        media_type: impl Into<String>,
        file_name: impl Into<String>,
    ) -> crate::Result<Self> {
        let data = base64_bytes::decode(encoded)
            .map_err(|e| crate::Error::InvalidArgument(format!("invalid attachment: {}", e)))?;
        Ok(Self::new(data, media_type, file_name))
    }
}

impl fmt::Debug for InlineAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineAttachment")
            .field("bytes", &self.data.len())
            .field("media_type", &self.media_type)
            .field("file_name", &self.file_name)
            .finish()
    }
}

mod base64_bytes {
    use super::*;

    pub fn decode(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
        let body = match encoded.split_once(',') {
            Some((prefix, body)) if prefix.starts_with("data:") => body,
            _ => encoded,
        };
        base64::engine::general_purpose::STANDARD.decode(body)
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode(&s).map_err(serde::de::Error::custom)
    }
}

macro_rules! record_identity {
    () => {
        fn id(&self) -> &RecordId {
            &self.id
        }

        fn set_id(&mut self, id: RecordId) {
            self.id = id;
        }

        fn set_tenant(&mut self, tenant: TenantId) {
            self.user_id = Some(tenant);
        }

        fn clear_timestamps(&mut self) {
            self.created_at = None;
        }
    };
}

macro_rules! record_attachment {
    () => {
        fn pending_attachment(&self) -> Option<&InlineAttachment> {
            self.pending_image.as_ref()
        }

        fn take_pending_attachment(&mut self) -> Option<InlineAttachment> {
            self.pending_image.take()
        }

        fn image_url(&self) -> Option<&str> {
            self.image_url.as_deref()
        }

        fn set_image_url(&mut self, url: String) {
            self.image_url = Some(url);
        }
    };
}

fn round(value: Decimal, precision: u32) -> Decimal {
    value.round_dp(precision)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<TenantId>,
    pub customer_id: RecordId,
    pub customer_name: String,
    pub qat_type: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
    pub status: PaymentStatus,
    pub currency: Currency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub is_returned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_image: Option<InlineAttachment>,
}

impl Sale {
    pub fn new(
        customer_id: RecordId,
        customer_name: impl Into<String>,
        qat_type: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
        status: PaymentStatus,
        currency: Currency,
    ) -> Self {
        Self {
            id: RecordId::new(),
            user_id: None,
            customer_id,
            customer_name: customer_name.into(),
            qat_type: qat_type.into(),
            quantity,
            unit_price,
            total: quantity * unit_price,
            status,
            currency,
            notes: None,
            date: Utc::now(),
            is_returned: false,
            returned_at: None,
            created_at: None,
            image_url: None,
            pending_image: None,
        }
    }

    /// Round quantity and price to the tenant precision and recompute the total
    pub fn normalize(&mut self, precision: u32) {
        self.quantity = round(self.quantity, precision);
        self.unit_price = round(self.unit_price, precision);
        self.total = round(self.quantity * self.unit_price, precision);
    }

    pub fn line(&self) -> StockLine {
        StockLine::new(&self.qat_type, self.quantity)
    }
}

impl Record for Sale {
    const TABLE: Table = Table::Sales;
    record_identity!();
    record_attachment!();

    fn into_upsert(self) -> Operation {
        Operation::UpsertSale(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<TenantId>,
    pub supplier_id: RecordId,
    pub supplier_name: String,
    pub qat_type: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
    pub status: PaymentStatus,
    pub currency: Currency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub is_returned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_image: Option<InlineAttachment>,
}

impl Purchase {
    pub fn new(
        supplier_id: RecordId,
        supplier_name: impl Into<String>,
        qat_type: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
        status: PaymentStatus,
        currency: Currency,
    ) -> Self {
        Self {
            id: RecordId::new(),
            user_id: None,
            supplier_id,
            supplier_name: supplier_name.into(),
            qat_type: qat_type.into(),
            quantity,
            unit_price,
            total: quantity * unit_price,
            status,
            currency,
            notes: None,
            date: Utc::now(),
            is_returned: false,
            returned_at: None,
            created_at: None,
            image_url: None,
            pending_image: None,
        }
    }

    pub fn normalize(&mut self, precision: u32) {
        self.quantity = round(self.quantity, precision);
        self.unit_price = round(self.unit_price, precision);
        self.total = round(self.quantity * self.unit_price, precision);
    }

    pub fn line(&self) -> StockLine {
        StockLine::new(&self.qat_type, self.quantity)
    }
}

impl Record for Purchase {
    const TABLE: Table = Table::Purchases;
    record_identity!();
    record_attachment!();

    fn into_upsert(self) -> Operation {
        Operation::UpsertPurchase(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<TenantId>,
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Customer {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            user_id: None,
            name: name.into(),
            phone: phone.into(),
            address: None,
            created_at: None,
        }
    }
}

impl Record for Customer {
    const TABLE: Table = Table::Customers;
    record_identity!();

    fn into_upsert(self) -> Operation {
        Operation::UpsertCustomer(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<TenantId>,
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Supplier {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            user_id: None,
            name: name.into(),
            phone: phone.into(),
            region: None,
            created_at: None,
        }
    }
}

impl Record for Supplier {
    const TABLE: Table = Table::Suppliers;
    record_identity!();

    fn into_upsert(self) -> Operation {
        Operation::UpsertSupplier(self)
    }
}

/// Previous values of an edited voucher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoucherEdit {
    pub date: DateTime<Utc>,
    pub previous_amount: Decimal,
    pub previous_notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voucher {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<TenantId>,
    #[serde(rename = "type")]
    pub kind: VoucherKind,
    pub person_id: RecordId,
    pub person_name: String,
    pub person_type: PersonKind,
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(default)]
    pub notes: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edit_history: Vec<VoucherEdit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Voucher {
    pub fn new(
        kind: VoucherKind,
        person_id: RecordId,
        person_name: impl Into<String>,
        amount: Decimal,
        currency: Currency,
    ) -> Self {
        let person_type = match kind {
            VoucherKind::Receipt => PersonKind::Customer,
            VoucherKind::Payment => PersonKind::Supplier,
        };
        Self {
            id: RecordId::new(),
            user_id: None,
            kind,
            person_id,
            person_name: person_name.into(),
            person_type,
            amount,
            currency,
            notes: String::new(),
            date: Utc::now(),
            edit_history: Vec::new(),
            created_at: None,
        }
    }
}

impl Record for Voucher {
    const TABLE: Table = Table::Vouchers;
    record_identity!();

    fn into_upsert(self) -> Operation {
        Operation::UpsertVoucher(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<TenantId>,
    pub title: String,
    pub category: String,
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_image: Option<InlineAttachment>,
}

impl Expense {
    pub fn new(
        title: impl Into<String>,
        category: impl Into<String>,
        amount: Decimal,
        currency: Currency,
    ) -> Self {
        Self {
            id: RecordId::new(),
            user_id: None,
            title: title.into(),
            category: category.into(),
            amount,
            currency,
            notes: None,
            date: Utc::now(),
            created_at: None,
            image_url: None,
            pending_image: None,
        }
    }
}

impl Record for Expense {
    const TABLE: Table = Table::Expenses;
    record_identity!();
    record_attachment!();

    fn into_upsert(self) -> Operation {
        Operation::UpsertExpense(self)
    }
}

/// Stock-holding inventory category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<TenantId>,
    pub name: String,
    pub stock: Decimal,
    pub price: Decimal,
    pub currency: Currency,
    #[serde(default)]
    pub low_stock_threshold: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Category {
    pub fn new(name: impl Into<String>, stock: Decimal, price: Decimal, currency: Currency) -> Self {
        Self {
            id: RecordId::new(),
            user_id: None,
            name: name.into(),
            stock,
            price,
            currency,
            low_stock_threshold: Decimal::ZERO,
            created_at: None,
        }
    }

    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.low_stock_threshold
    }
}

impl Record for Category {
    const TABLE: Table = Table::Categories;
    record_identity!();

    fn into_upsert(self) -> Operation {
        Operation::UpsertCategory(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waste {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<TenantId>,
    pub qat_type: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub estimated_loss: Decimal,
    #[serde(default)]
    pub reason: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Waste {
    pub fn new(qat_type: impl Into<String>, quantity: Decimal, reason: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            user_id: None,
            qat_type: qat_type.into(),
            quantity,
            estimated_loss: Decimal::ZERO,
            reason: reason.into(),
            date: Utc::now(),
            created_at: None,
        }
    }

    pub fn line(&self) -> StockLine {
        StockLine::new(&self.qat_type, self.quantity)
    }
}

impl Record for Waste {
    const TABLE: Table = Table::Waste;
    record_identity!();

    fn into_upsert(self) -> Operation {
        Operation::UpsertWaste(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Warning,
    Info,
    AiAlert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<TenantId>,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>, kind: NotificationKind) -> Self {
        Self {
            id: RecordId::new(),
            user_id: None,
            title: title.into(),
            message: message.into(),
            kind,
            date: Utc::now(),
            read: false,
            created_at: None,
        }
    }
}

impl Record for Notification {
    const TABLE: Table = Table::Notifications;
    record_identity!();

    fn into_upsert(self) -> Operation {
        Operation::UpsertNotification(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpenseFrequency {
    #[serde(rename = "يومياً")]
    Daily,
    #[serde(rename = "أسبوعياً")]
    Weekly,
    #[serde(rename = "شهرياً")]
    Monthly,
    #[serde(rename = "سنوياً")]
    Yearly,
}

/// Recurring expense the UI can instantiate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseTemplate {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<TenantId>,
    pub title: String,
    pub category: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub frequency: ExpenseFrequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ExpenseTemplate {
    pub fn new(
        title: impl Into<String>,
        category: impl Into<String>,
        amount: Decimal,
        currency: Currency,
        frequency: ExpenseFrequency,
    ) -> Self {
        Self {
            id: RecordId::new(),
            user_id: None,
            title: title.into(),
            category: category.into(),
            amount,
            currency,
            frequency,
            created_at: None,
        }
    }
}

impl Record for ExpenseTemplate {
    const TABLE: Table = Table::ExpenseTemplates;
    record_identity!();

    fn into_upsert(self) -> Operation {
        Operation::UpsertExpenseTemplate(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceDirection {
    /// The counterparty owes us
    #[serde(rename = "مدين")]
    Debit,
    /// We owe the counterparty
    #[serde(rename = "دائن")]
    Credit,
}

/// Debt or credit carried over from before the tenant started using the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningBalance {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<TenantId>,
    pub person_id: RecordId,
    pub person_name: String,
    pub person_type: PersonKind,
    pub amount: Decimal,
    pub currency: Currency,
    pub balance_type: BalanceDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for OpeningBalance {
    const TABLE: Table = Table::OpeningBalances;
    record_identity!();

    fn into_upsert(self) -> Operation {
        Operation::UpsertOpeningBalance(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingSettings {
    #[serde(default)]
    pub allow_negative_stock: bool,
    #[serde(default)]
    pub auto_share_whatsapp: bool,
    #[serde(default = "default_true")]
    pub show_debt_alerts: bool,
    #[serde(default)]
    pub hide_zero_balances: bool,
    #[serde(default)]
    pub decimal_precision: u32,
}

fn default_true() -> bool {
    true
}

impl Default for AccountingSettings {
    fn default() -> Self {
        Self {
            allow_negative_stock: false,
            auto_share_whatsapp: false,
            show_debt_alerts: true,
            hide_zero_balances: false,
            decimal_precision: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRates {
    #[serde(rename = "SAR_TO_YER")]
    pub sar_to_yer: Decimal,
    #[serde(rename = "OMR_TO_YER")]
    pub omr_to_yer: Decimal,
}

impl Default for ExchangeRates {
    fn default() -> Self {
        Self {
            sar_to_yer: Decimal::from(430),
            omr_to_yer: Decimal::from(425),
        }
    }
}

/// Tenant-scoped settings document, stored once per tenant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub accounting_settings: AccountingSettings,
    #[serde(default)]
    pub exchange_rates: ExchangeRates,
}

/// Area of the app an activity entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Sale,
    Purchase,
    Voucher,
    Waste,
    General,
    Auth,
    Settings,
    Expense,
    Data,
}

impl ActivityKind {
    /// Kind of activity a confirmed write to `table` is logged as.
    /// Writes to notifications and to the log itself are not logged.
    pub fn for_table(table: Table) -> Option<Self> {
        match table {
            Table::Sales => Some(Self::Sale),
            Table::Purchases => Some(Self::Purchase),
            Table::Vouchers => Some(Self::Voucher),
            Table::Waste => Some(Self::Waste),
            Table::Expenses | Table::ExpenseTemplates => Some(Self::Expense),
            Table::UserSettings => Some(Self::Settings),
            Table::Customers | Table::Suppliers | Table::Categories | Table::OpeningBalances => {
                Some(Self::General)
            }
            Table::Notifications | Table::ActivityLog => None,
        }
    }
}

/// Append-only audit entry; written best effort, never queued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<TenantId>,
    pub action: String,
    #[serde(default)]
    pub details: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(
        tenant: TenantId,
        kind: ActivityKind,
        action: impl Into<String>,
        details: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RecordId::new(),
            user_id: Some(tenant),
            action: action.into(),
            details: details.into(),
            kind,
            timestamp,
        }
    }
}
