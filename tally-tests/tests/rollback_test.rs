/// Rollback and drain-failure integration tests

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::sync::Arc;
use tally_core::records::{Customer, NotificationKind, Settings};
use tally_core::{Error, EngineConfig, RecordId, RetryPolicy, Table, TenantId};
use tally_sync::remote::{Query, RemoteResult};
use tally_sync::{Engine, MemoryBlobStore, MemoryRemote, RemoteError, RemoteStore, SyncStatus};
use tally_test_utils::{credit_sale, init_tracing, TestEngine};
use tokio::sync::{Notify, Semaphore};

#[tokio::test]
async fn test_rejection_is_not_queued_and_rolls_back() -> Result<()> {
    let t = TestEngine::new();
    let customer = Customer::new("Bad", "1");
    t.remote.reject_record(&customer.id);

    let err = t
        .engine
        .business()
        .save_customer(customer.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RemoteRejected { .. }));
    assert!(!err.is_network());
    assert!(t.engine.business().customers().get(&customer.id).is_none());
    assert_eq!(t.engine.queue_depth(), 0);
    assert_eq!(t.sink.count(NotificationKind::Warning), 1);
    Ok(())
}

#[tokio::test]
async fn test_rejected_edit_restores_previous_version() -> Result<()> {
    let t = TestEngine::new();
    let mut customer = t.seed_customer("Original").await;
    t.remote.reject_record(&customer.id);

    customer.name = "Changed".into();
    assert!(t.engine.business().save_customer(customer.clone()).await.is_err());

    let entry = t.engine.business().customers().get(&customer.id).unwrap();
    assert_eq!(entry.record.name, "Original");
    assert_eq!(entry.status, SyncStatus::Confirmed);
    Ok(())
}

#[tokio::test]
async fn test_failed_delete_restores_position() -> Result<()> {
    let t = TestEngine::new();
    t.seed_customer("Oldest").await;
    let middle = t.seed_customer("Middle").await;
    t.seed_customer("Newest").await;
    let customers = t.engine.business().customers();
    let position = customers.position(&middle.id).unwrap();
    assert_eq!(position, 1);

    t.remote
        .fail_next(RemoteError::rejected("42501", "permission denied"));
    assert!(t.engine.business().delete_customer(&middle.id).await.is_err());

    assert_eq!(customers.position(&middle.id), Some(position));
    assert_eq!(customers.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_failed_sale_delete_keeps_stock() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(10)).await;
    let customer = t.seed_customer("Ali").await;
    let sale = credit_sale(&customer, "Sabri", dec!(4));
    t.engine.business().add_sale(sale.clone()).await?;
    assert_eq!(t.stock("Sabri"), dec!(6));

    t.remote
        .fail_next(RemoteError::rejected("42501", "permission denied"));
    assert!(t.engine.business().delete_sale(&sale.id).await.is_err());
    assert_eq!(t.stock("Sabri"), dec!(6));
    assert!(t.engine.business().sales().get(&sale.id).is_some());

    t.engine.business().delete_sale(&sale.id).await?;
    assert_eq!(t.stock("Sabri"), dec!(10));
    Ok(())
}

#[tokio::test]
async fn test_rejected_sale_restores_stock() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(10)).await;
    let customer = t.seed_customer("Ali").await;
    let sale = credit_sale(&customer, "Sabri", dec!(4));
    t.remote.reject_record(&sale.id);

    assert!(t.engine.business().add_sale(sale).await.is_err());
    assert_eq!(t.stock("Sabri"), dec!(10));
    assert!(t.engine.business().sales().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rejected_settings_restore_session() -> Result<()> {
    let t = TestEngine::new();
    let mut settings = Settings::default();
    settings.accounting_settings.decimal_precision = 3;

    t.remote
        .fail_next(RemoteError::rejected("42501", "permission denied"));
    assert!(t.engine.finance().update_settings(settings).await.is_err());
    assert_eq!(t.engine.session().decimal_precision(), 0);
    Ok(())
}

#[tokio::test]
async fn test_poisoned_entry_does_not_block_others() -> Result<()> {
    let t = TestEngine::new();
    t.go_offline();
    let poisoned = t.seed_customer("Poisoned").await;
    let healthy = t.seed_customer("Healthy").await;
    t.remote.reject_record(&poisoned.id);

    t.go_online();
    let report = t.engine.drain().await?;
    assert_eq!(report.failed, 1);
    assert_eq!(report.applied, 1);
    assert_eq!(report.remaining, 1);

    let customers = t.engine.business().customers();
    assert!(matches!(
        customers.get(&poisoned.id).unwrap().status,
        SyncStatus::Failed(_)
    ));
    assert_eq!(
        customers.get(&healthy.id).unwrap().status,
        SyncStatus::Confirmed
    );

    // the entry stays queued and goes through once the remote accepts it
    t.remote.accept_record(&poisoned.id);
    let report = t.engine.drain().await?;
    assert_eq!(report.applied, 1);
    assert_eq!(t.engine.queue_depth(), 0);
    Ok(())
}

/// Remote whose upserts wait until the test lets them through
struct GatedRemote {
    inner: MemoryRemote,
    entered: Notify,
    gate: Semaphore,
}

#[async_trait]
impl RemoteStore for GatedRemote {
    async fn upsert(&self, table: Table, row: Value) -> RemoteResult<Value> {
        self.entered.notify_one();
        let _permit = self.gate.acquire().await.expect("gate closed");
        self.inner.upsert(table, row).await
    }

    async fn delete(&self, table: Table, id: &RecordId, tenant: &TenantId) -> RemoteResult<()> {
        self.inner.delete(table, id, tenant).await
    }

    async fn query(&self, table: Table, query: &Query) -> RemoteResult<Vec<Value>> {
        self.inner.query(table, query).await
    }

    async fn call_procedure(&self, name: &str, args: Value) -> RemoteResult<Value> {
        self.inner.call_procedure(name, args).await
    }
}

#[tokio::test]
async fn test_concurrent_drain_coalesces() -> Result<()> {
    init_tracing();
    let remote = Arc::new(GatedRemote {
        inner: MemoryRemote::new(),
        entered: Notify::new(),
        gate: Semaphore::new(0),
    });
    let engine = Arc::new(
        Engine::builder()
            .config(EngineConfig::default().with_retry_policy(RetryPolicy::no_retry()))
            .remote(remote.clone())
            .blobs(Arc::new(MemoryBlobStore::new()))
            .tenant(TenantId::from_str("t1"))
            .online(false)
            .build()?,
    );
    engine
        .business()
        .save_customer(Customer::new("Queued", "1"))
        .await?;
    engine.connectivity().set_online(true);

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.drain().await }
    });
    remote.entered.notified().await;

    let second = engine.drain().await?;
    assert!(second.coalesced);
    assert_eq!(second.attempted, 0);

    remote.gate.add_permits(1);
    let first = first.await??;
    assert!(!first.coalesced);
    assert_eq!(first.applied, 1);
    assert_eq!(engine.queue_depth(), 0);
    Ok(())
}
