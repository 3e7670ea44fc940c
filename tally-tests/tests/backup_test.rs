/// Backup, restore and activity log integration tests

use anyhow::Result;
use rust_decimal_macros::dec;
use std::time::Duration;
use tally_core::backup::BackupPackage;
use tally_core::records::{ActivityKind, Customer, NotificationKind};
use tally_core::{Error, Table};
use tally_test_utils::{credit_sale, TestEngine, TENANT};

#[tokio::test]
async fn test_confirmed_writes_are_logged() -> Result<()> {
    let t = TestEngine::new();
    let customer = t.seed_customer("Ali").await;
    t.clock.advance(Duration::from_secs(1));
    t.engine.business().delete_customer(&customer.id).await?;

    let logs = t.engine.activity_logs().await?;
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].action, "Deleted customers");
    assert_eq!(logs[1].action, "Saved customers");
    assert_eq!(logs[1].kind, ActivityKind::General);
    assert!(logs[1].details.contains(customer.id.as_str()));
    assert!(logs.iter().all(|e| e.user_id.as_ref().map(|u| u.as_str()) == Some(TENANT)));
    Ok(())
}

#[tokio::test]
async fn test_queued_writes_are_not_logged() -> Result<()> {
    let t = TestEngine::new();
    t.go_offline();
    t.seed_customer("Queued").await;
    t.engine
        .notifications()
        .add("Saved offline", "later", NotificationKind::Info)
        .await?;

    t.go_online();
    t.engine.drain().await?;
    assert!(t.engine.activity_logs().await?.is_empty());
    assert!(t.remote.rows(Table::ActivityLog).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_activity_logs_newest_first_and_limited() -> Result<()> {
    let t = TestEngine::new();
    let mut last = None;
    for i in 0..55 {
        t.clock.advance(Duration::from_secs(1));
        last = Some(t.seed_customer(&format!("Customer {}", i)).await);
    }

    let logs = t.engine.activity_logs().await?;
    assert_eq!(logs.len(), 50);
    assert!(logs.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
    let last = last.unwrap();
    assert!(logs[0].details.contains(last.id.as_str()));
    Ok(())
}

#[tokio::test]
async fn test_backup_restores_into_empty_account() -> Result<()> {
    let source = TestEngine::new();
    source.seed_category("Sabri", dec!(20)).await;
    let customer = source.seed_customer("Ali").await;
    let sale = credit_sale(&customer, "Sabri", dec!(5));
    source.engine.business().add_sale(sale.clone()).await?;
    source
        .engine
        .notifications()
        .add("Low stock", "Sabri", NotificationKind::Warning)
        .await?;

    let package = source.engine.prepare_backup()?;
    assert_eq!(package.len(), 4);
    let json = serde_json::to_string(&package)?;
    let package: BackupPackage = serde_json::from_str(&json)?;

    let target = TestEngine::new();
    let report = target.engine.restore_backup(&package).await?;
    assert!(report.is_complete());
    assert_eq!(report.restored, 3);

    assert_eq!(target.stock("Sabri"), dec!(15));
    assert!(target.engine.business().customers().get(&customer.id).is_some());
    let restored = target.engine.business().sales().get(&sale.id).unwrap();
    assert_eq!(restored.record.quantity, dec!(5));
    assert!(target.remote.rows(Table::Notifications).is_empty());
    assert_eq!(target.sink.count(NotificationKind::Success), 1);

    let logs = target.engine.activity_logs().await?;
    assert!(logs.iter().any(|e| e.kind == ActivityKind::Data));
    Ok(())
}

#[tokio::test]
async fn test_restore_writes_in_chunks() -> Result<()> {
    let t = TestEngine::new();
    let mut package = BackupPackage::empty(chrono::Utc::now());
    for i in 0..120 {
        package.customers.push(Customer::new(format!("Customer {}", i), "7"));
    }
    let rejected = package.customers[60].id.clone();
    t.remote.reject_record(&rejected);

    let upserts_before = t.remote.calls().upserts;
    let report = t.engine.restore_backup(&package).await?;

    // three chunks of customers plus the activity entry
    assert_eq!(t.remote.calls().upserts - upserts_before, 4);
    assert_eq!(report.restored, 70);
    assert_eq!(report.failed_chunks.len(), 1);
    assert_eq!(report.failed_chunks[0].0, Table::Customers);
    assert_eq!(report.failed_chunks[0].1, 1);
    assert_eq!(t.remote.rows(Table::Customers).len(), 70);
    assert_eq!(t.engine.business().customers().len(), 70);
    assert_eq!(t.sink.count(NotificationKind::Warning), 1);
    Ok(())
}

#[tokio::test]
async fn test_restore_needs_connection() -> Result<()> {
    let t = TestEngine::new();
    let mut package = BackupPackage::empty(chrono::Utc::now());
    package.customers.push(Customer::new("Ali", "7"));

    t.go_offline();
    let err = t.engine.restore_backup(&package).await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));
    assert_eq!(t.engine.queue_depth(), 0);
    Ok(())
}
