/// In-memory queue store for tests and ephemeral sessions
///
/// Same semantics as `FileQueueStore`; everything is lost on drop.

use super::{QueueIndex, QueueStore, Snapshot};
use crate::clock::{is_fresh, SharedClock};
use crate::error::ValidationError;
use crate::operation::{Operation, OperationDraft, PendingOperation};
use crate::types::OperationId;
use crate::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

pub struct MemoryQueueStore {
    inner: Mutex<MemoryInner>,
    clock: SharedClock,
    snapshot_ttl: Duration,
}

struct MemoryInner {
    queue: QueueIndex,
    snapshots: HashMap<String, Snapshot>,
}

impl MemoryQueueStore {
    pub fn new(clock: SharedClock, snapshot_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                queue: QueueIndex::new(),
                snapshots: HashMap::new(),
            }),
            clock,
            snapshot_ttl,
        }
    }
}

impl QueueStore for MemoryQueueStore {
    fn enqueue(&self, draft: OperationDraft) -> Result<PendingOperation> {
        let mut inner = self.inner.lock();
        let sequence = inner.queue.next_sequence();
        let op = PendingOperation::from_draft(draft, sequence, self.clock.now_millis());
        inner.queue.insert(op.clone());
        Ok(op)
    }

    fn list_all(&self) -> Result<Vec<PendingOperation>> {
        Ok(self.inner.lock().queue.iter().cloned().collect())
    }

    fn remove(&self, id: &OperationId) -> Result<bool> {
        Ok(self.inner.lock().queue.remove(id))
    }

    fn count(&self) -> usize {
        self.inner.lock().queue.len()
    }

    fn update_operation(&self, id: &OperationId, operation: Operation) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.queue.get_mut(id) {
            Some(op) => {
                op.operation = operation;
                Ok(())
            }
            None => Err(ValidationError::NotFound(id.to_string()).into()),
        }
    }

    fn save_snapshot(&self, key: &str, data: Value) -> Result<()> {
        let saved_at = self.clock.now_millis();
        self.inner
            .lock()
            .snapshots
            .insert(key.to_string(), Snapshot { data, saved_at });
        Ok(())
    }

    fn load_snapshot(&self, key: &str) -> Result<Option<Value>> {
        let now = self.clock.now_millis();
        Ok(self
            .inner
            .lock()
            .snapshots
            .get(key)
            .filter(|snap| is_fresh(snap.saved_at, now, self.snapshot_ttl))
            .map(|snap| snap.data.clone()))
    }

    fn clear_snapshots(&self) -> Result<()> {
        self.inner.lock().snapshots.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::records::Settings;
    use crate::types::TenantId;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> (MemoryQueueStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (MemoryQueueStore::new(clock.clone(), Duration::from_secs(600)), clock)
    }

    fn draft(tenant: &str) -> OperationDraft {
        OperationDraft::new(
            TenantId::from_str(tenant),
            Operation::UpdateSettings(Settings::default()),
        )
    }

    #[test]
    fn test_memory_store_fifo() {
        let (store, clock) = store();
        let a = store.enqueue(draft("t1")).unwrap();
        clock.advance(Duration::from_millis(5));
        let b = store.enqueue(draft("t2")).unwrap();

        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, a.id);
        assert_eq!(all[1].id, b.id);
        assert!(all[0].sequence < all[1].sequence);
        assert_eq!(all[1].created_at, 5);
    }

    #[test]
    fn test_memory_store_remove_and_count() {
        let (store, _) = store();
        let a = store.enqueue(draft("t1")).unwrap();
        assert_eq!(store.count(), 1);
        assert!(store.remove(&a.id).unwrap());
        assert!(!store.remove(&a.id).unwrap());
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_memory_snapshot_boundary() {
        let (store, clock) = store();
        store.save_snapshot("k", json!([1, 2])).unwrap();
        clock.advance(Duration::from_millis(599_999));
        assert_eq!(store.load_snapshot("k").unwrap(), Some(json!([1, 2])));
        clock.advance(Duration::from_millis(1));
        assert_eq!(store.load_snapshot("k").unwrap(), None);
    }

    #[test]
    fn test_clear_snapshots_keeps_queue() {
        let (store, _) = store();
        store.enqueue(draft("t1")).unwrap();
        store.save_snapshot("k", json!([])).unwrap();
        store.clear_snapshots().unwrap();
        assert_eq!(store.load_snapshot("k").unwrap(), None);
        assert_eq!(store.count(), 1);
    }
}
