/// In-process remote store and blob store
///
/// Behave like the hosted backend closely enough to drive the engine in
/// tests and demos: an online switch, injectable failures, per-call
/// counters, tenant-filtered ordered queries and the two return procedures.

use super::{BlobStore, Query, RemoteError, RemoteResult, RemoteStore, ALREADY_RETURNED};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use tally_core::{RecordId, Table, TenantId};
use tracing::debug;

/// Number of calls each remote entry point has received
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub upserts: usize,
    pub deletes: usize,
    pub queries: usize,
    pub procedures: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.upserts + self.deletes + self.queries + self.procedures
    }
}

#[derive(Default)]
struct RemoteInner {
    tables: HashMap<Table, BTreeMap<String, Value>>,
    injected: VecDeque<RemoteError>,
    rejected_ids: HashSet<String>,
    calls: CallCounts,
}

pub struct MemoryRemote {
    online: AtomicBool,
    inner: Mutex<RemoteInner>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            inner: Mutex::new(RemoteInner::default()),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, AtomicOrdering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(AtomicOrdering::SeqCst)
    }

    /// Fail the next call with `error`, whatever it is
    pub fn fail_next(&self, error: RemoteError) {
        self.inner.lock().injected.push_back(error);
    }

    /// Reject every upsert of the row with this id
    pub fn reject_record(&self, id: &RecordId) {
        self.inner.lock().rejected_ids.insert(id.to_string());
    }

    pub fn accept_record(&self, id: &RecordId) {
        self.inner.lock().rejected_ids.remove(id.as_str());
    }

    pub fn calls(&self) -> CallCounts {
        self.inner.lock().calls
    }

    /// Insert a row directly, bypassing counters and failures
    pub fn seed(&self, table: Table, row: Value) {
        let key = row_key(table, &row);
        self.inner
            .lock()
            .tables
            .entry(table)
            .or_default()
            .insert(key, row);
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.inner
            .lock()
            .tables
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row(&self, table: Table, id: &str) -> Option<Value> {
        self.inner
            .lock()
            .tables
            .get(&table)
            .and_then(|rows| rows.get(id).cloned())
    }

    fn check(&self, inner: &mut RemoteInner) -> RemoteResult<()> {
        if !self.is_online() {
            return Err(RemoteError::Network("remote is offline".into()));
        }
        match inner.injected.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Conflict key of `row`, or the rejection the backend would return
    fn accept_row(inner: &RemoteInner, table: Table, row: &Value) -> RemoteResult<String> {
        let key = row_key(table, row);
        if key.is_empty() {
            return Err(RemoteError::rejected(
                "23502",
                format!("{} row without {}", table, table.conflict_key()),
            ));
        }
        if inner.rejected_ids.contains(&key) {
            return Err(RemoteError::rejected("23514", format!("row {} violates a constraint", key)));
        }
        Ok(key)
    }

    fn store_row(inner: &mut RemoteInner, table: Table, key: String, mut row: Value) -> Value {
        let rows = inner.tables.entry(table).or_default();
        let created_at = rows
            .get(&key)
            .and_then(|existing| existing.get("created_at").cloned())
            .unwrap_or_else(|| json!(Utc::now()));
        if let Value::Object(map) = &mut row {
            map.insert("created_at".into(), created_at);
        }
        debug!(table = %table, key = %key, "Remote upsert");
        rows.insert(key, row.clone());
        row
    }

    fn return_row(
        inner: &mut RemoteInner,
        table: Table,
        id: &str,
        tenant: &str,
    ) -> RemoteResult<Value> {
        let row = inner
            .tables
            .get_mut(&table)
            .and_then(|rows| rows.get_mut(id))
            .filter(|row| row.get("user_id").and_then(Value::as_str) == Some(tenant))
            .ok_or_else(|| RemoteError::rejected("P0002", format!("{} {} not found", table, id)))?;

        if row.get("is_returned").and_then(Value::as_bool) == Some(true) {
            return Err(RemoteError::rejected(
                ALREADY_RETURNED,
                format!("{} {} is already returned", table, id),
            ));
        }
        row["is_returned"] = Value::Bool(true);
        row["returned_at"] = json!(Utc::now());
        Ok(row.clone())
    }
}

fn row_key(table: Table, row: &Value) -> String {
    match row.get(table.conflict_key()) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn arg<'a>(args: &'a Value, name: &str) -> RemoteResult<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteError::rejected("22023", format!("missing argument {}", name)))
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn upsert(&self, table: Table, row: Value) -> RemoteResult<Value> {
        let mut inner = self.inner.lock();
        inner.calls.upserts += 1;
        self.check(&mut inner)?;

        let key = Self::accept_row(&inner, table, &row)?;
        Ok(Self::store_row(&mut inner, table, key, row))
    }

    /// All or nothing: one rejected row fails the whole batch
    async fn upsert_many(&self, table: Table, rows: Vec<Value>) -> RemoteResult<Vec<Value>> {
        let mut inner = self.inner.lock();
        inner.calls.upserts += 1;
        self.check(&mut inner)?;

        let keys = rows
            .iter()
            .map(|row| Self::accept_row(&inner, table, row))
            .collect::<RemoteResult<Vec<String>>>()?;
        Ok(keys
            .into_iter()
            .zip(rows)
            .map(|(key, row)| Self::store_row(&mut inner, table, key, row))
            .collect())
    }

    async fn delete(&self, table: Table, id: &RecordId, tenant: &TenantId) -> RemoteResult<()> {
        let mut inner = self.inner.lock();
        inner.calls.deletes += 1;
        self.check(&mut inner)?;

        if let Some(rows) = inner.tables.get_mut(&table) {
            let owned = rows
                .get(id.as_str())
                .map(|row| row.get("user_id").and_then(Value::as_str) == Some(tenant.as_str()))
                .unwrap_or(false);
            if owned {
                rows.remove(id.as_str());
            }
        }
        Ok(())
    }

    async fn query(&self, table: Table, query: &Query) -> RemoteResult<Vec<Value>> {
        let mut inner = self.inner.lock();
        inner.calls.queries += 1;
        self.check(&mut inner)?;

        let mut rows: Vec<Value> = inner
            .tables
            .get(&table)
            .map(|rows| {
                rows.values()
                    .filter(|row| {
                        row.get("user_id").and_then(Value::as_str) == Some(query.tenant.as_str())
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            let ord = compare(a.get(query.order_by), b.get(query.order_by));
            if query.ascending {
                ord
            } else {
                ord.reverse()
            }
        });
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn call_procedure(&self, name: &str, args: Value) -> RemoteResult<Value> {
        let mut inner = self.inner.lock();
        inner.calls.procedures += 1;
        self.check(&mut inner)?;

        match name {
            "return_sale" => {
                let id = arg(&args, "sale_uuid")?;
                let tenant = arg(&args, "user_uuid")?;
                Self::return_row(&mut inner, Table::Sales, id, tenant)
            }
            "return_purchase" => {
                let id = arg(&args, "purchase_uuid")?;
                let tenant = arg(&args, "user_uuid")?;
                Self::return_row(&mut inner, Table::Purchases, id, tenant)
            }
            other => Err(RemoteError::rejected(
                "42883",
                format!("unknown procedure {}", other),
            )),
        }
    }
}

const BLOB_URL_PREFIX: &str = "memory://blobs/";

#[derive(Default)]
struct BlobInner {
    objects: HashMap<String, (Bytes, String)>,
    uploads: usize,
    deletes: usize,
}

pub struct MemoryBlobStore {
    online: AtomicBool,
    inner: Mutex<BlobInner>,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            inner: Mutex::new(BlobInner::default()),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, AtomicOrdering::SeqCst);
    }

    pub fn uploads(&self) -> usize {
        self.inner.lock().uploads
    }

    pub fn deletes(&self) -> usize {
        self.inner.lock().deletes
    }

    /// Stored bytes and content type at `path`
    pub fn object(&self, path: &str) -> Option<(Bytes, String)> {
        self.inner.lock().objects.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> RemoteResult<()> {
        if self.online.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Network("blob store is offline".into()))
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, path: &str, data: Bytes, content_type: &str) -> RemoteResult<String> {
        self.check()?;
        let mut inner = self.inner.lock();
        inner.uploads += 1;
        inner
            .objects
            .insert(path.to_string(), (data, content_type.to_string()));
        Ok(format!("{}{}", BLOB_URL_PREFIX, path))
    }

    async fn delete(&self, url: &str) -> RemoteResult<()> {
        self.check()?;
        let mut inner = self.inner.lock();
        inner.deletes += 1;
        if let Some(path) = url.strip_prefix(BLOB_URL_PREFIX) {
            inner.objects.remove(path);
        }
        Ok(())
    }
}
