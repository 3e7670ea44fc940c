/// UI-facing collections with per-record sync status
///
/// Collections are ordered newest first. Locks are held only for the
/// duration of a single call and never across an `.await`.

use parking_lot::Mutex;
use tally_core::{Record, RecordId};

use crate::repository::Persisted;

/// Reconciliation state of a record shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Applied locally, waiting in the durable queue
    Pending,
    /// Accepted by the remote store
    Confirmed,
    /// The last attempt was refused
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<T> {
    pub record: T,
    pub status: SyncStatus,
}

impl<T> Tracked<T> {
    pub fn confirmed(record: T) -> Self {
        Self {
            record,
            status: SyncStatus::Confirmed,
        }
    }

    pub fn pending(record: T) -> Self {
        Self {
            record,
            status: SyncStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == SyncStatus::Pending
    }

    /// Pending or failed; either way the queue still holds it
    pub fn is_unsynced(&self) -> bool {
        self.status != SyncStatus::Confirmed
    }
}

/// Result of a mutation that was not rejected
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<T> {
    Confirmed(T),
    Pending(T),
}

impl<T> MutationOutcome<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, MutationOutcome::Pending(_))
    }

    pub fn record(&self) -> &T {
        match self {
            MutationOutcome::Confirmed(r) | MutationOutcome::Pending(r) => r,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            MutationOutcome::Confirmed(r) | MutationOutcome::Pending(r) => r,
        }
    }
}

impl<T> From<Persisted<T>> for MutationOutcome<T> {
    fn from(p: Persisted<T>) -> Self {
        match p {
            Persisted::Confirmed(r) => MutationOutcome::Confirmed(r),
            Persisted::Queued { record, .. } => MutationOutcome::Pending(record),
        }
    }
}

/// An entry removed from a collection, with the position it occupied
#[derive(Debug, Clone, PartialEq)]
pub struct Removed<T> {
    pub index: usize,
    pub entry: Tracked<T>,
}

pub struct Collection<T: Record> {
    items: Mutex<Vec<Tracked<T>>>,
}

impl<T: Record> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Collection<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Replace the contents with freshly fetched records.
    ///
    /// Unsynced local records the remote does not know about yet are kept
    /// at the front. An unsynced local version of a fetched record wins over
    /// the fetched one.
    pub fn replace_all(&self, fetched: Vec<T>) {
        let mut items = self.items.lock();
        let mut next: Vec<Tracked<T>> = items
            .iter()
            .filter(|t| t.is_unsynced() && !fetched.iter().any(|f| f.id() == t.record.id()))
            .cloned()
            .collect();
        for record in fetched {
            let local = items
                .iter()
                .find(|t| t.is_unsynced() && t.record.id() == record.id());
            next.push(match local {
                Some(local) => local.clone(),
                None => Tracked::confirmed(record),
            });
        }
        *items = next;
    }

    pub fn entries(&self) -> Vec<Tracked<T>> {
        self.items.lock().clone()
    }

    pub fn records(&self) -> Vec<T> {
        self.items.lock().iter().map(|t| t.record.clone()).collect()
    }

    pub fn get(&self, id: &RecordId) -> Option<Tracked<T>> {
        self.items
            .lock()
            .iter()
            .find(|t| t.record.id() == id)
            .cloned()
    }

    pub fn position(&self, id: &RecordId) -> Option<usize> {
        self.items.lock().iter().position(|t| t.record.id() == id)
    }

    /// Insert at the front, or replace in place if the id is present.
    /// Returns the replaced entry and its position.
    pub fn upsert(&self, entry: Tracked<T>) -> Option<Removed<T>> {
        let mut items = self.items.lock();
        match items.iter().position(|t| t.record.id() == entry.record.id()) {
            Some(index) => {
                let previous = std::mem::replace(&mut items[index], entry);
                Some(Removed {
                    index,
                    entry: previous,
                })
            }
            None => {
                items.insert(0, entry);
                None
            }
        }
    }

    /// Undo an `upsert`: restore the replaced entry or drop the inserted one
    pub fn revert_upsert(&self, id: &RecordId, previous: Option<Removed<T>>) {
        match previous {
            Some(prev) => {
                let mut items = self.items.lock();
                match items.iter().position(|t| t.record.id() == id) {
                    Some(index) => items[index] = prev.entry,
                    None => {
                        let index = prev.index.min(items.len());
                        items.insert(index, prev.entry);
                    }
                }
            }
            None => {
                self.remove(id);
            }
        }
    }

    pub fn remove(&self, id: &RecordId) -> Option<Removed<T>> {
        let mut items = self.items.lock();
        let index = items.iter().position(|t| t.record.id() == id)?;
        Some(Removed {
            index,
            entry: items.remove(index),
        })
    }

    /// Put a removed entry back where it was
    pub fn restore(&self, removed: Removed<T>) {
        let mut items = self.items.lock();
        let index = removed.index.min(items.len());
        items.insert(index, removed.entry);
    }

    /// Apply `f` to the record with `id`; returns false when absent
    pub fn update(&self, id: &RecordId, f: impl FnOnce(&mut T)) -> bool {
        let mut items = self.items.lock();
        match items.iter_mut().find(|t| t.record.id() == id) {
            Some(t) => {
                f(&mut t.record);
                true
            }
            None => false,
        }
    }

    pub fn set_status(&self, id: &RecordId, status: SyncStatus) {
        if let Some(t) = self.items.lock().iter_mut().find(|t| t.record.id() == id) {
            t.status = status;
        }
    }

    /// Apply a persistence result to the entry with the record's id
    pub fn reconcile(&self, outcome: &MutationOutcome<T>) {
        let (record, status) = match outcome {
            MutationOutcome::Confirmed(r) => (r.clone(), SyncStatus::Confirmed),
            MutationOutcome::Pending(r) => (r.clone(), SyncStatus::Pending),
        };
        let mut items = self.items.lock();
        if let Some(t) = items.iter_mut().find(|t| t.record.id() == record.id()) {
            t.record = record;
            t.status = status;
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::records::Customer;

    fn customer(name: &str) -> Customer {
        Customer::new(name, "7")
    }

    #[test]
    fn test_upsert_inserts_newest_first() {
        let c = Collection::new();
        let a = customer("a");
        let b = customer("b");
        c.upsert(Tracked::confirmed(a.clone()));
        c.upsert(Tracked::pending(b.clone()));

        let names: Vec<_> = c.records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(c.get(&b.id).unwrap().is_pending());
    }

    #[test]
    fn test_revert_upsert_restores_previous() {
        let c = Collection::new();
        let original = customer("a");
        c.upsert(Tracked::confirmed(original.clone()));
        c.upsert(Tracked::confirmed(customer("b")));

        let mut edited = original.clone();
        edited.name = "edited".into();
        let previous = c.upsert(Tracked::pending(edited));
        assert_eq!(previous.as_ref().unwrap().index, 1);

        c.revert_upsert(&original.id, previous);
        assert_eq!(c.get(&original.id).unwrap().record, original);
        assert_eq!(c.position(&original.id), Some(1));

        let fresh = customer("c");
        c.upsert(Tracked::pending(fresh.clone()));
        c.revert_upsert(&fresh.id, None);
        assert!(c.get(&fresh.id).is_none());
    }

    #[test]
    fn test_remove_and_restore_position() {
        let c = Collection::new();
        for name in ["a", "b", "c"] {
            c.upsert(Tracked::confirmed(customer(name)));
        }
        let middle = c.records()[1].clone();
        let removed = c.remove(&middle.id).unwrap();
        assert_eq!(removed.index, 1);
        assert_eq!(c.len(), 2);

        c.restore(removed);
        assert_eq!(c.records()[1], middle);
    }

    #[test]
    fn test_replace_all_keeps_unsynced_pending() {
        let c = Collection::new();
        let local = customer("local");
        let synced = customer("synced");
        c.upsert(Tracked::pending(local.clone()));
        c.upsert(Tracked::pending(synced.clone()));

        c.replace_all(vec![synced.clone(), customer("remote")]);
        let entries = c.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].record.id, local.id);
        assert!(entries[0].is_pending());
        assert_eq!(entries[2].status, SyncStatus::Confirmed);
    }

    #[test]
    fn test_replace_all_prefers_unsynced_local_version() {
        let c = Collection::new();
        let stored = customer("stored");
        let mut edited = stored.clone();
        edited.phone = "edited".into();
        c.upsert(Tracked::pending(edited.clone()));

        c.replace_all(vec![stored.clone()]);
        let entry = c.get(&stored.id).unwrap();
        assert!(entry.is_pending());
        assert_eq!(entry.record.phone, "edited");

        c.set_status(&stored.id, SyncStatus::Confirmed);
        c.replace_all(vec![stored.clone()]);
        assert_eq!(c.get(&stored.id).unwrap().record, stored);
    }

    #[test]
    fn test_reconcile_outcome() {
        let c = Collection::new();
        let a = customer("a");
        c.upsert(Tracked::pending(a.clone()));
        let mut canonical = a.clone();
        canonical.phone = "999".into();
        c.reconcile(&MutationOutcome::Confirmed(canonical));

        let t = c.get(&a.id).unwrap();
        assert_eq!(t.status, SyncStatus::Confirmed);
        assert_eq!(t.record.phone, "999");
    }
}
