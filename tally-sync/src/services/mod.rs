/// Optimistic mutation services
///
/// Each service owns the UI-facing collections of its area. A mutation is
/// validated first, applied to memory, then persisted through the
/// repository; a failure undoes exactly what was applied.

mod backup;
mod business;
mod finance;
mod inventory;
mod notifications;

pub use backup::{BackupService, RestoreReport};
pub use business::BusinessService;
pub use finance::FinanceService;
pub use inventory::InventoryService;
pub use notifications::NotificationService;

use std::collections::HashSet;
use std::sync::Arc;
use tally_core::ledger::Movement;
use tally_core::records::{ActivityKind, NotificationKind};
use tally_core::{Error, Operation, Record, RecordId, Result, Table};
use tracing::{info, warn};

use crate::repository::Repository;
use crate::state::{Collection, MutationOutcome, Removed, Tracked};

/// User-visible notice raised by a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
}

impl Notice {
    pub fn new(title: impl Into<String>, message: impl Into<String>, kind: NotificationKind) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind,
        }
    }
}

/// Receiver of user-visible notices; the host renders them
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

pub type SharedSink = Arc<dyn NotificationSink>;

/// Sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notice: Notice) {
        match notice.kind {
            NotificationKind::Warning => warn!(title = %notice.title, "{}", notice.message),
            _ => info!(title = %notice.title, "{}", notice.message),
        }
    }
}

/// Result of a mutation applied to several records, one at a time
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Records written or queued
    pub updated: usize,
    /// Records whose mutation failed, with the reason; already rolled back
    pub failed: Vec<(RecordId, Error)>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, id: RecordId, result: Result<()>) {
        match result {
            Ok(()) => self.updated += 1,
            Err(e) => {
                warn!(id = %id, error = %e, "Batch mutation failed for record");
                self.failed.push((id, e));
            }
        }
    }
}

/// Reject an empty or missing identity reference
pub(crate) fn require_counterparty(id: &RecordId, what: &'static str) -> Result<()> {
    if id.is_empty() {
        return Err(tally_core::ValidationError::MissingCounterparty(what).into());
    }
    Ok(())
}

/// Apply `record` optimistically to `collection`, persist it and reconcile.
///
/// On failure the collection is restored and `undo` runs before the error
/// is returned.
pub(crate) async fn optimistic_upsert<T: Record>(
    repo: &Repository,
    collection: &Collection<T>,
    sink: &dyn NotificationSink,
    record: T,
    undo: impl FnOnce(),
) -> Result<MutationOutcome<T>> {
    let id = record.id().clone();
    let previous = collection.upsert(Tracked::pending(record.clone()));

    match repo.persist(record, false).await {
        Ok(persisted) => {
            let outcome = MutationOutcome::from(persisted);
            collection.reconcile(&outcome);
            if outcome.is_pending() {
                sink.notify(Notice::new(
                    "Saved offline",
                    format!("{} {} will sync when the connection returns", T::TABLE, id),
                    NotificationKind::Info,
                ));
            } else {
                log_activity(repo, T::TABLE, "Saved", &id).await;
            }
            Ok(outcome)
        }
        Err(e) => {
            collection.revert_upsert(&id, previous);
            undo();
            sink.notify(failure_notice(&e));
            Err(e)
        }
    }
}

/// Remove a record optimistically, delete it remotely, restore it on failure.
///
/// `apply` runs the stock side effects of the removal and returns what it
/// applied; `revert` receives that back if the delete fails.
pub(crate) async fn optimistic_delete<T: Record>(
    repo: &Repository,
    collection: &Collection<T>,
    sink: &dyn NotificationSink,
    id: &RecordId,
    apply: impl FnOnce(&T) -> Vec<Movement>,
    revert: impl FnOnce(&[Movement]),
) -> Result<MutationOutcome<T>> {
    repo.session().tenant()?;
    let removed: Removed<T> = collection
        .remove(id)
        .ok_or_else(|| tally_core::ValidationError::NotFound(id.to_string()))?;
    let record = removed.entry.record.clone();
    let applied = apply(&record);

    match repo.delete(T::TABLE, id, record.image_url(), false).await {
        Ok(persisted) => {
            if persisted.is_queued() {
                sink.notify(Notice::new(
                    "Deleted offline",
                    format!("{} {} will be removed when the connection returns", T::TABLE, id),
                    NotificationKind::Info,
                ));
                Ok(MutationOutcome::Pending(record))
            } else {
                log_activity(repo, T::TABLE, "Deleted", id).await;
                Ok(MutationOutcome::Confirmed(record))
            }
        }
        Err(e) => {
            collection.restore(removed);
            revert(&applied);
            sink.notify(failure_notice(&e));
            Err(e)
        }
    }
}

/// Replace `collection` with fetched records, leaving out the ones a queued
/// delete is still going to remove.
pub(crate) fn refresh<T: Record>(
    repo: &Repository,
    collection: &Collection<T>,
    fetched: Vec<T>,
) -> Result<()> {
    let deleted: HashSet<RecordId> = repo
        .tenant_operations()?
        .into_iter()
        .filter_map(|op| match op.operation {
            Operation::DeleteRecord { table, id, .. } if table == T::TABLE => Some(id),
            _ => None,
        })
        .collect();
    collection.replace_all(
        fetched
            .into_iter()
            .filter(|r| !deleted.contains(r.id()))
            .collect(),
    );
    Ok(())
}

/// Record a confirmed mutation in the activity log, if the table has a kind
pub(crate) async fn log_activity(repo: &Repository, table: Table, verb: &str, id: &RecordId) {
    if let Some(kind) = ActivityKind::for_table(table) {
        let action = format!("{} {}", verb, table);
        repo.log_activity(kind, &action, &format!("{} {}", table, id))
            .await;
    }
}

fn failure_notice(e: &Error) -> Notice {
    Notice::new("Could not save", e.to_string(), NotificationKind::Warning)
}
