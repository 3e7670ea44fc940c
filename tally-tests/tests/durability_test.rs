/// Durable queue integration tests
///
/// The queue must survive an engine restart, recover from a torn write at
/// the end of its log, and refuse a file that is not a queue log at all.

use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tally_core::records::Customer;
use tally_core::{
    FileQueueStore, ManualClock, Operation, OperationDraft, QueueStore, Table, TenantId,
};
use tally_test_utils::TestEngine;
use tempfile::TempDir;

fn draft(name: &str) -> OperationDraft {
    OperationDraft::new(
        TenantId::from_str("t1"),
        Operation::UpsertCustomer(Customer::new(name, "1")),
    )
}

fn open(dir: &TempDir) -> tally_core::Result<FileQueueStore> {
    FileQueueStore::open(
        dir.path(),
        Arc::new(ManualClock::new(0)),
        Duration::from_secs(600),
        256,
    )
}

#[tokio::test]
async fn test_queue_survives_restart() -> Result<()> {
    let t = TestEngine::durable();
    t.go_offline();
    let first = t.seed_customer("First").await;
    let second = t.seed_customer("Second").await;
    let before: Vec<_> = t
        .engine
        .repository()
        .pending_operations()?
        .into_iter()
        .map(|op| op.id)
        .collect();

    let t = t.reopen();
    assert_eq!(t.engine.queue_depth(), 2);
    let after: Vec<_> = t
        .engine
        .repository()
        .pending_operations()?
        .into_iter()
        .map(|op| op.id)
        .collect();
    assert_eq!(before, after);

    t.go_online();
    let report = t.engine.drain().await?;
    assert_eq!(report.applied, 2);
    assert!(t.remote.row(Table::Customers, first.id.as_str()).is_some());
    assert!(t.remote.row(Table::Customers, second.id.as_str()).is_some());

    let t = t.reopen();
    assert_eq!(t.engine.queue_depth(), 0);
    Ok(())
}

#[test]
fn test_torn_tail_is_truncated() -> Result<()> {
    let dir = TempDir::new()?;
    {
        let store = open(&dir)?;
        store.enqueue(draft("a"))?;
        store.enqueue(draft("b"))?;
    }

    let mut file = OpenOptions::new()
        .append(true)
        .open(dir.path().join("operations.log"))?;
    file.write_all(&[7, 0, 0, 0, 0, 0, 0, 0, 200, 0, 0, 0, b'{'])?;
    drop(file);

    let store = open(&dir)?;
    assert_eq!(store.count(), 2);
    store.enqueue(draft("c"))?;
    drop(store);

    let store = open(&dir)?;
    let names: Vec<String> = store
        .list_all()?
        .into_iter()
        .filter_map(|op| match op.operation {
            Operation::UpsertCustomer(c) => Some(c.name),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    Ok(())
}

#[test]
fn test_foreign_file_is_refused() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::write(dir.path().join("operations.log"), [0xAB; 64])?;

    let err = open(&dir).err().expect("open should fail");
    assert_eq!(err.code(), "CORRUPTION");
    Ok(())
}

#[test]
fn test_clear_snapshots_keeps_operations() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open(&dir)?;
    store.enqueue(draft("a"))?;
    store.save_snapshot("tenant-1:customers", serde_json::json!([{"id": "x"}]))?;

    store.clear_snapshots()?;
    assert!(store.load_snapshot("tenant-1:customers")?.is_none());
    assert_eq!(store.count(), 1);
    drop(store);

    let store = open(&dir)?;
    assert_eq!(store.count(), 1);
    assert!(store.load_snapshot("tenant-1:customers")?.is_none());
    Ok(())
}
