/// File-backed queue store
///
/// A directory holding `operations.log` and `snapshots.log`. Both are framed
/// append-only logs replayed into memory on open; once superseded records
/// outnumber the configured threshold a log is rewritten with only its live
/// entries.

use super::log::FramedLog;
use super::{QueueIndex, QueueStore, Snapshot};
use crate::clock::{is_fresh, SharedClock};
use crate::error::ValidationError;
use crate::operation::{Operation, OperationDraft, PendingOperation};
use crate::types::OperationId;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const OPERATIONS_FILE: &str = "operations.log";
const SNAPSHOTS_FILE: &str = "snapshots.log";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum OperationEntry {
    Enqueue(PendingOperation),
    Update { id: OperationId, operation: Operation },
    Remove { id: OperationId },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SnapshotEntry {
    Put {
        key: String,
        data: Value,
        saved_at: i64,
    },
    Clear,
}

pub struct FileQueueStore {
    dir: PathBuf,
    inner: Mutex<FileInner>,
    clock: SharedClock,
    snapshot_ttl: Duration,
    compact_threshold: usize,
}

struct FileInner {
    ops_log: FramedLog,
    snap_log: FramedLog,
    queue: QueueIndex,
    snapshots: HashMap<String, Snapshot>,
}

impl FileQueueStore {
    /// Open (or create) the store in `dir`.
    pub fn open(
        dir: impl AsRef<Path>,
        clock: SharedClock,
        snapshot_ttl: Duration,
        compact_threshold: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("cannot create {}: {}", dir.display(), e)))?;

        let (ops_log, op_entries) = FramedLog::open::<OperationEntry>(dir.join(OPERATIONS_FILE))?;
        let (snap_log, snap_entries) = FramedLog::open::<SnapshotEntry>(dir.join(SNAPSHOTS_FILE))?;

        let mut queue = QueueIndex::new();
        for entry in op_entries {
            match entry {
                OperationEntry::Enqueue(op) => queue.insert(op),
                OperationEntry::Update { id, operation } => {
                    if let Some(op) = queue.get_mut(&id) {
                        op.operation = operation;
                    }
                }
                OperationEntry::Remove { id } => {
                    queue.remove(&id);
                }
            }
        }

        let mut snapshots = HashMap::new();
        for entry in snap_entries {
            match entry {
                SnapshotEntry::Put {
                    key,
                    data,
                    saved_at,
                } => {
                    snapshots.insert(key, Snapshot { data, saved_at });
                }
                SnapshotEntry::Clear => snapshots.clear(),
            }
        }

        info!(
            dir = %dir.display(),
            pending = queue.len(),
            snapshots = snapshots.len(),
            "Opened queue store"
        );

        let store = Self {
            dir,
            inner: Mutex::new(FileInner {
                ops_log,
                snap_log,
                queue,
                snapshots,
            }),
            clock,
            snapshot_ttl,
            compact_threshold,
        };
        store.maybe_compact()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Rewrite both logs with only their live entries
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        compact_operations(&mut inner)?;
        compact_snapshots(&mut inner)?;
        Ok(())
    }

    fn maybe_compact(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.ops_log.records().saturating_sub(inner.queue.len()) > self.compact_threshold {
            compact_operations(&mut inner)?;
        }
        if inner.snap_log.records().saturating_sub(inner.snapshots.len()) > self.compact_threshold {
            compact_snapshots(&mut inner)?;
        }
        Ok(())
    }
}

fn compact_operations(inner: &mut FileInner) -> Result<()> {
    let live: Vec<OperationEntry> = inner
        .queue
        .iter()
        .cloned()
        .map(OperationEntry::Enqueue)
        .collect();
    let before = inner.ops_log.records();
    inner.ops_log.rewrite(&live)?;
    debug!(before, after = live.len(), "Compacted operations log");
    Ok(())
}

fn compact_snapshots(inner: &mut FileInner) -> Result<()> {
    let live: Vec<SnapshotEntry> = inner
        .snapshots
        .iter()
        .map(|(key, snap)| SnapshotEntry::Put {
            key: key.clone(),
            data: snap.data.clone(),
            saved_at: snap.saved_at,
        })
        .collect();
    let before = inner.snap_log.records();
    inner.snap_log.rewrite(&live)?;
    debug!(before, after = live.len(), "Compacted snapshots log");
    Ok(())
}

impl QueueStore for FileQueueStore {
    fn enqueue(&self, draft: OperationDraft) -> Result<PendingOperation> {
        let op = {
            let mut inner = self.inner.lock();
            let sequence = inner.queue.next_sequence();
            let op = PendingOperation::from_draft(draft, sequence, self.clock.now_millis());
            inner
                .ops_log
                .append(&OperationEntry::Enqueue(op.clone()))
                .map_err(|e| e.with_context("enqueue"))?;
            inner.queue.insert(op.clone());
            op
        };
        debug!(
            id = %op.id,
            action = op.operation.action(),
            sequence = op.sequence,
            "Enqueued operation"
        );
        Ok(op)
    }

    fn list_all(&self) -> Result<Vec<PendingOperation>> {
        Ok(self.inner.lock().queue.iter().cloned().collect())
    }

    fn remove(&self, id: &OperationId) -> Result<bool> {
        {
            let mut inner = self.inner.lock();
            if !inner.queue.contains(id) {
                return Ok(false);
            }
            inner
                .ops_log
                .append(&OperationEntry::Remove { id: id.clone() })
                .map_err(|e| e.with_context("remove"))?;
            inner.queue.remove(id);
        }
        self.maybe_compact()?;
        Ok(true)
    }

    fn count(&self) -> usize {
        self.inner.lock().queue.len()
    }

    fn update_operation(&self, id: &OperationId, operation: Operation) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.queue.contains(id) {
            return Err(ValidationError::NotFound(id.to_string()).into());
        }
        inner
            .ops_log
            .append(&OperationEntry::Update {
                id: id.clone(),
                operation: operation.clone(),
            })
            .map_err(|e| e.with_context("update"))?;
        if let Some(op) = inner.queue.get_mut(id) {
            op.operation = operation;
        }
        Ok(())
    }

    fn save_snapshot(&self, key: &str, data: Value) -> Result<()> {
        let saved_at = self.clock.now_millis();
        {
            let mut inner = self.inner.lock();
            inner
                .snap_log
                .append(&SnapshotEntry::Put {
                    key: key.to_string(),
                    data: data.clone(),
                    saved_at,
                })
                .map_err(|e| e.with_context("save snapshot"))?;
            inner
                .snapshots
                .insert(key.to_string(), Snapshot { data, saved_at });
        }
        self.maybe_compact()
    }

    fn load_snapshot(&self, key: &str) -> Result<Option<Value>> {
        let inner = self.inner.lock();
        let now = self.clock.now_millis();
        Ok(inner
            .snapshots
            .get(key)
            .filter(|snap| is_fresh(snap.saved_at, now, self.snapshot_ttl))
            .map(|snap| snap.data.clone()))
    }

    fn clear_snapshots(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .snap_log
            .append(&SnapshotEntry::Clear)
            .map_err(|e| e.with_context("clear snapshots"))?;
        inner.snapshots.clear();
        compact_snapshots(&mut inner)
    }
}
