/// Durable local store for pending operations and collection snapshots
///
/// Two partitions live behind one `QueueStore`:
/// - `operations`: the ordered queue of mutations awaiting replay
/// - `snapshots`: last-known copies of remote collections, each stamped with
///   the time it was written so staleness can be judged on read
///
/// Clearing snapshots never touches the operations partition.

mod file;
mod log;
mod memory;

pub use file::FileQueueStore;
pub use memory::MemoryQueueStore;

use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::operation::{Operation, OperationDraft, PendingOperation};
use crate::types::OperationId;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub trait QueueStore: Send + Sync {
    /// Durably append an operation; it is on disk before this returns.
    fn enqueue(&self, draft: OperationDraft) -> Result<PendingOperation>;

    /// All pending operations, oldest first
    fn list_all(&self) -> Result<Vec<PendingOperation>>;

    /// Remove an operation. Removing an unknown id is not an error.
    fn remove(&self, id: &OperationId) -> Result<bool>;

    fn count(&self) -> usize;

    /// Replace the payload of a queued operation, keeping its position
    fn update_operation(&self, id: &OperationId, operation: Operation) -> Result<()>;

    fn save_snapshot(&self, key: &str, data: Value) -> Result<()>;

    /// Returns `None` when the snapshot is absent or older than the snapshot TTL
    fn load_snapshot(&self, key: &str) -> Result<Option<Value>>;

    fn clear_snapshots(&self) -> Result<()>;
}

pub type SharedQueueStore = Arc<dyn QueueStore>;

/// Open the store described by `config`: file-backed when a path is set,
/// in memory otherwise.
pub fn open_store(config: &EngineConfig, clock: SharedClock) -> Result<SharedQueueStore> {
    match &config.store_path {
        Some(path) => Ok(Arc::new(FileQueueStore::open(
            path,
            clock,
            config.snapshot_ttl,
            config.compact_threshold,
        )?)),
        None => Ok(Arc::new(MemoryQueueStore::new(clock, config.snapshot_ttl))),
    }
}

/// A stored collection copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub data: Value,
    pub saved_at: i64,
}

/// In-memory ordering of the operations partition
#[derive(Debug, Default)]
pub(crate) struct QueueIndex {
    by_sequence: BTreeMap<u64, PendingOperation>,
    sequence_of: HashMap<OperationId, u64>,
    next_sequence: u64,
}

impl QueueIndex {
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            ..Default::default()
        }
    }

    pub fn next_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    pub fn insert(&mut self, op: PendingOperation) {
        self.next_sequence = self.next_sequence.max(op.sequence + 1);
        self.sequence_of.insert(op.id.clone(), op.sequence);
        self.by_sequence.insert(op.sequence, op);
    }

    pub fn remove(&mut self, id: &OperationId) -> bool {
        match self.sequence_of.remove(id) {
            Some(seq) => self.by_sequence.remove(&seq).is_some(),
            None => false,
        }
    }

    pub fn get_mut(&mut self, id: &OperationId) -> Option<&mut PendingOperation> {
        let seq = self.sequence_of.get(id)?;
        self.by_sequence.get_mut(seq)
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        self.sequence_of.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sequence_of.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingOperation> {
        self.by_sequence.values()
    }
}
