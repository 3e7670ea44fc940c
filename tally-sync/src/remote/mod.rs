/// Remote record store and blob storage abstractions
///
/// The engine only needs per-table upsert/delete/query, named procedures and
/// a place to put attachments. Failures are classified at the boundary:
/// connectivity problems become `RemoteError::Network`, everything the
/// server refused becomes `RemoteError::Rejected`.

mod memory;

pub use memory::{CallCounts, MemoryBlobStore, MemoryRemote};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tally_core::{Error, RecordId, Table, TenantId};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote unreachable: {0}")]
    Network(String),

    #[error("remote rejected ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl RemoteError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Network(msg) => Error::Network(msg),
            RemoteError::Rejected { code, message } => Error::RemoteRejected { code, message },
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Rejection code of a return procedure called on an already returned row
pub const ALREADY_RETURNED: &str = "P0001";

/// Tenant-scoped listing of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub tenant: TenantId,
    pub order_by: &'static str,
    pub ascending: bool,
    pub limit: Option<usize>,
}

impl Query {
    /// The standard listing for `table`
    pub fn for_table(table: Table, tenant: TenantId) -> Self {
        let (order_by, ascending) = table.default_order();
        Self {
            tenant,
            order_by,
            ascending,
            limit: table.default_limit(),
        }
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert or replace a row on the table's conflict key; returns the stored row
    async fn upsert(&self, table: Table, row: Value) -> RemoteResult<Value>;

    /// Upsert several rows of one table. Stores without a batch call write
    /// them one at a time.
    async fn upsert_many(&self, table: Table, rows: Vec<Value>) -> RemoteResult<Vec<Value>> {
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            stored.push(self.upsert(table, row).await?);
        }
        Ok(stored)
    }

    async fn delete(&self, table: Table, id: &RecordId, tenant: &TenantId) -> RemoteResult<()>;

    async fn query(&self, table: Table, query: &Query) -> RemoteResult<Vec<Value>>;

    async fn call_procedure(&self, name: &str, args: Value) -> RemoteResult<Value>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` at `path` and return its public reference
    async fn upload(&self, path: &str, data: Bytes, content_type: &str) -> RemoteResult<String>;

    /// Remove a stored object. Unknown references are not an error.
    async fn delete(&self, url: &str) -> RemoteResult<()>;
}

pub type SharedRemote = Arc<dyn RemoteStore>;
pub type SharedBlobStore = Arc<dyn BlobStore>;

/// Storage path of an attachment: `{tenant}/{folder}/{owner}/{file}`
pub fn attachment_path(tenant: &TenantId, folder: &str, owner: &str, file_name: &str) -> String {
    format!("{}/{}/{}/{}", tenant, folder, owner, file_name)
}
