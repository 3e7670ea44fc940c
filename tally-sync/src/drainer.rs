/// Synchronization drainer
///
/// Replays the durable queue against the remote store in insertion order.
/// An entry is removed only after the remote accepted it. When an entry
/// fails, later entries for the same record wait for the next cycle so a
/// record's operations are never applied out of order; unrelated entries
/// still go through.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use tally_core::{OperationId, PendingOperation, RecordId, Result, Table};

use crate::repository::Repository;

/// An operation the drainer dispatched
#[derive(Debug, Clone, PartialEq)]
pub struct DrainedEntry {
    pub operation_id: OperationId,
    pub table: Table,
    pub record_id: Option<RecordId>,
}

impl DrainedEntry {
    fn of(op: &PendingOperation) -> Self {
        Self {
            operation_id: op.id.clone(),
            table: op.operation.table(),
            record_id: op.operation.record_id().cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrainFailure {
    pub entry: DrainedEntry,
    pub reason: String,
}

/// Outcome of one drain cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub attempted: usize,
    pub applied: usize,
    pub failed: usize,
    /// Entries held back because an earlier entry for the same record failed
    pub deferred: usize,
    /// Queue depth after the cycle
    pub remaining: usize,
    /// Set when another drain was already running and this call did nothing
    pub coalesced: bool,
    pub applied_entries: Vec<DrainedEntry>,
    pub failures: Vec<DrainFailure>,
}

impl DrainReport {
    pub fn coalesced() -> Self {
        Self {
            coalesced: true,
            ..Default::default()
        }
    }

    fn idle(remaining: usize) -> Self {
        Self {
            remaining,
            ..Default::default()
        }
    }
}

/// Receives every report produced by the drainer, including background cycles
pub trait DrainListener: Send + Sync {
    fn on_drained(&self, report: &DrainReport);
}

struct Background {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Drainer {
    repo: Arc<Repository>,
    interval: Duration,
    running: tokio::sync::Mutex<()>,
    listener: Mutex<Option<Arc<dyn DrainListener>>>,
    background: Mutex<Option<Background>>,
}

impl Drainer {
    pub fn new(repo: Arc<Repository>, interval: Duration) -> Self {
        Self {
            repo,
            interval,
            running: tokio::sync::Mutex::new(()),
            listener: Mutex::new(None),
            background: Mutex::new(None),
        }
    }

    pub fn set_listener(&self, listener: Arc<dyn DrainListener>) {
        *self.listener.lock() = Some(listener);
    }

    /// Run one drain cycle. Returns immediately when a cycle is already running.
    pub async fn drain(&self) -> Result<DrainReport> {
        let _running = match self.running.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Drain already in progress");
                return Ok(DrainReport::coalesced());
            }
        };

        let report = self.drain_queue().await?;
        self.repo.publish_queue_depth();

        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.on_drained(&report);
        }
        Ok(report)
    }

    async fn drain_queue(&self) -> Result<DrainReport> {
        if !self.repo.connectivity().is_online() {
            return Ok(DrainReport::idle(self.repo.queue_depth()));
        }
        let tenant = match self.repo.session().tenant() {
            Ok(tenant) => tenant,
            Err(_) => return Ok(DrainReport::idle(self.repo.queue_depth())),
        };

        let pending = self.repo.pending_operations()?;
        if pending.is_empty() {
            return Ok(DrainReport::idle(0));
        }
        info!(count = pending.len(), "Draining queued operations");

        let mut report = DrainReport::default();
        let mut blocked: HashSet<String> = HashSet::new();

        for op in pending {
            if op.tenant_id != tenant {
                continue;
            }
            if !self.repo.connectivity().is_online() {
                info!("Went offline during drain, stopping");
                break;
            }
            let key = op.record_key();
            if blocked.contains(&key) {
                debug!(operation_id = %op.id, record = %key, "Deferred behind failed entry");
                report.deferred += 1;
                continue;
            }

            report.attempted += 1;
            let entry = DrainedEntry::of(&op);
            let action = op.operation.action();
            match self.dispatch(op).await {
                Ok(()) => {
                    if let Err(e) = self.repo.store().remove(&entry.operation_id) {
                        warn!(
                            operation_id = %entry.operation_id,
                            action,
                            error = %e,
                            "Applied remotely but could not remove from the queue"
                        );
                    }
                    debug!(operation_id = %entry.operation_id, action, "Applied queued operation");
                    report.applied += 1;
                    report.applied_entries.push(entry);
                }
                Err(e) => {
                    warn!(
                        operation_id = %entry.operation_id,
                        action,
                        error = %e,
                        "Queued operation failed, keeping it for the next cycle"
                    );
                    blocked.insert(key);
                    report.failed += 1;
                    report.failures.push(DrainFailure {
                        entry,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.remaining = self.repo.queue_depth();
        info!(
            applied = report.applied,
            failed = report.failed,
            deferred = report.deferred,
            remaining = report.remaining,
            "Drain finished"
        );
        Ok(report)
    }

    /// Upload a pending attachment, record its reference, then replay.
    async fn dispatch(&self, mut op: PendingOperation) -> Result<()> {
        let url = match op.operation.pending_attachment() {
            Some(attachment) => Some(
                self.repo
                    .upload_attachment(
                        &op.tenant_id,
                        op.operation.table(),
                        &op.attachment_owner(),
                        attachment,
                    )
                    .await?,
            ),
            None => None,
        };
        if let Some(url) = url {
            op.operation.resolve_attachment(url);
            self.repo
                .store()
                .update_operation(&op.id, op.operation.clone())?;
        }
        self.repo.replay(&op).await
    }

    /// Drain on every offline to online transition and on a fixed interval
    pub fn start(self: &Arc<Self>) {
        let mut background = self.background.lock();
        if background.is_some() {
            debug!("Drainer already started");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let drainer = Arc::clone(self);
        let mut online_rx = self.repo.connectivity().subscribe();
        let period = self.interval;
        let mut was_online = *online_rx.borrow_and_update();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);

            loop {
                tokio::select! {
                    changed = online_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *online_rx.borrow_and_update();
                        let reconnected = online && !was_online;
                        was_online = online;
                        if !reconnected {
                            continue;
                        }
                        info!("Connection restored, draining queue");
                    }
                    _ = interval.tick() => {}
                    _ = shutdown_rx.recv() => {
                        info!("Drainer shutting down");
                        break;
                    }
                }
                if let Err(e) = drainer.drain().await {
                    error!("Drain error: {}", e);
                }
            }
        });

        *background = Some(Background { shutdown_tx, handle });
    }

    pub async fn stop(&self) {
        let background = self.background.lock().take();
        if let Some(bg) = background {
            let _ = bg.shutdown_tx.send(()).await;
            if let Err(e) = bg.handle.await {
                warn!("Drainer task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.background.lock().is_some()
    }
}
