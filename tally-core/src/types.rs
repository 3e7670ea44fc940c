use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Owning account of every record and queue entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-generated record identity; assigned once, never changed
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    /// Create a new random record ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from a string
    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a queue entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub String);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Currency {
    YER,
    SAR,
    OMR,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::YER, Currency::SAR, Currency::OMR];
}

impl Default for Currency {
    fn default() -> Self {
        Currency::YER
    }
}

/// Settlement of a sale or purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[serde(rename = "نقدي")]
    Cash,
    #[serde(rename = "آجل")]
    Credit,
}

/// Direction of a voucher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoucherKind {
    /// Money received from a customer
    #[serde(rename = "قبض")]
    Receipt,
    /// Money paid to a supplier
    #[serde(rename = "دفع")]
    Payment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersonKind {
    #[serde(rename = "عميل")]
    Customer,
    #[serde(rename = "مورد")]
    Supplier,
}

/// Remote tables the engine reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Sales,
    Purchases,
    Customers,
    Suppliers,
    Vouchers,
    Expenses,
    Categories,
    Waste,
    Notifications,
    ExpenseTemplates,
    OpeningBalances,
    UserSettings,
    ActivityLog,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Purchases => "purchases",
            Self::Customers => "customers",
            Self::Suppliers => "suppliers",
            Self::Vouchers => "vouchers",
            Self::Expenses => "expenses",
            Self::Categories => "categories",
            Self::Waste => "waste",
            Self::Notifications => "notifications",
            Self::ExpenseTemplates => "expense_templates",
            Self::OpeningBalances => "opening_balances",
            Self::UserSettings => "user_settings",
            Self::ActivityLog => "activity_log",
        }
    }

    /// Sort field and direction used when listing the table
    pub fn default_order(&self) -> (&'static str, bool) {
        match self {
            Self::Customers | Self::Suppliers | Self::Categories => ("name", true),
            Self::ExpenseTemplates => ("title", true),
            Self::UserSettings => ("id", true),
            Self::ActivityLog => ("timestamp", false),
            _ => ("date", false),
        }
    }

    pub fn default_limit(&self) -> Option<usize> {
        match self {
            Self::Sales | Self::Purchases => Some(200),
            Self::Notifications | Self::ActivityLog => Some(50),
            _ => None,
        }
    }

    /// Column the remote store upserts on
    pub fn conflict_key(&self) -> &'static str {
        match self {
            Self::UserSettings => "user_id",
            _ => "id",
        }
    }

    /// Storage folder for attachments of this table, if it carries any
    pub fn attachment_folder(&self) -> Option<&'static str> {
        match self {
            Self::Sales | Self::Purchases | Self::Expenses => Some(self.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
