/// Offline queueing and drain integration tests
///
/// Writes made without a connection must land in the durable queue, show
/// up as pending in the collections, and reach the remote store exactly
/// once, in order, after reconnecting.

use anyhow::Result;
use rust_decimal_macros::dec;
use tally_core::records::{Customer, Voucher};
use tally_core::{Currency, Operation, Table, VoucherKind};
use tally_sync::SyncStatus;
use tally_test_utils::{credit_sale, TestEngine, TENANT};

#[tokio::test]
async fn test_offline_voucher_round_trip() -> Result<()> {
    let t = TestEngine::new();
    let customer = t.seed_customer("Saleh").await;
    t.go_offline();

    let voucher = Voucher::new(
        VoucherKind::Receipt,
        customer.id.clone(),
        customer.name.clone(),
        dec!(50),
        Currency::YER,
    );
    let id = voucher.id.clone();
    let outcome = t.engine.finance().add_voucher(voucher).await?;
    assert!(outcome.is_pending());
    assert_eq!(t.engine.queue_depth(), 1);
    assert!(t.engine.finance().vouchers().get(&id).unwrap().is_pending());
    assert!(t.remote.row(Table::Vouchers, id.as_str()).is_none());

    t.go_online();
    let report = t.engine.drain().await?;
    assert_eq!(report.applied, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(t.engine.queue_depth(), 0);

    let entry = t.engine.finance().vouchers().get(&id).unwrap();
    assert_eq!(entry.status, SyncStatus::Confirmed);
    let row = t.remote.row(Table::Vouchers, id.as_str()).unwrap();
    assert_eq!(row["user_id"], TENANT);
    assert_eq!(row["type"], "قبض");
    Ok(())
}

#[tokio::test]
async fn test_replay_is_idempotent() -> Result<()> {
    let t = TestEngine::new();
    t.go_offline();
    let customer = Customer::new("Nasser", "711");
    let id = customer.id.clone();
    t.engine.business().save_customer(customer).await?;

    let queued = t.engine.repository().pending_operations()?;
    assert_eq!(queued.len(), 1);

    t.go_online();
    t.engine.repository().replay(&queued[0]).await?;
    t.engine.repository().replay(&queued[0]).await?;

    let rows = t.remote.rows(Table::Customers);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], id.as_str());
    assert_eq!(rows[0]["name"], "Nasser");
    Ok(())
}

#[tokio::test]
async fn test_drain_preserves_fifo_per_record() -> Result<()> {
    let t = TestEngine::new();
    t.go_offline();

    let mut customer = Customer::new("Fahd", "700");
    t.engine.business().save_customer(customer.clone()).await?;
    customer.phone = "701".into();
    t.engine.business().save_customer(customer.clone()).await?;
    customer.phone = "702".into();
    t.engine.business().save_customer(customer.clone()).await?;

    let queued = t.engine.repository().pending_operations()?;
    let sequences: Vec<u64> = queued.iter().map(|op| op.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));

    t.go_online();
    let report = t.engine.drain().await?;
    assert_eq!(report.applied, 3);

    let row = t.remote.row(Table::Customers, customer.id.as_str()).unwrap();
    assert_eq!(row["phone"], "702");
    Ok(())
}

#[tokio::test]
async fn test_create_then_delete_offline() -> Result<()> {
    let t = TestEngine::new();
    t.go_offline();

    let customer = t.seed_customer("Temp").await;
    t.engine.business().delete_customer(&customer.id).await?;
    assert!(t.engine.business().customers().get(&customer.id).is_none());

    let actions: Vec<&str> = t
        .engine
        .repository()
        .pending_operations()?
        .iter()
        .map(|op| op.operation.action())
        .collect();
    assert_eq!(actions, vec!["upsert_customer", "delete_record"]);

    t.go_online();
    t.engine.drain().await?;
    assert!(t.remote.rows(Table::Customers).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_network_failure_falls_back_to_queue() -> Result<()> {
    let t = TestEngine::new();
    // The engine still believes it is online; only the remote is down
    t.remote.set_online(false);

    let outcome = t
        .engine
        .business()
        .save_customer(Customer::new("Late", "1"))
        .await?;
    assert!(outcome.is_pending());
    assert_eq!(t.engine.queue_depth(), 1);

    t.remote.set_online(true);
    let report = t.engine.drain().await?;
    assert_eq!(report.applied, 1);
    Ok(())
}

#[tokio::test]
async fn test_offline_return_is_replayed() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(20)).await;
    let customer = t.seed_customer("Ali").await;
    let sale = tally_test_utils::credit_sale(&customer, "Sabri", dec!(5));
    let id = sale.id.clone();
    t.engine.business().add_sale(sale).await?;

    t.go_offline();
    let outcome = t.engine.business().return_sale(&id).await?;
    assert!(outcome.is_pending());
    assert!(outcome.record().is_returned);
    assert_eq!(t.stock("Sabri"), dec!(20));

    let queued = t.engine.repository().pending_operations()?;
    assert!(matches!(queued[0].operation, Operation::ReturnSale { .. }));

    t.go_online();
    t.engine.drain().await?;
    let row = t.remote.row(Table::Sales, id.as_str()).unwrap();
    assert_eq!(row["is_returned"], true);
    Ok(())
}

#[tokio::test]
async fn test_reload_keeps_pending_records() -> Result<()> {
    let t = TestEngine::new();
    let confirmed = t.seed_customer("Online").await;
    t.engine.business().reload(false).await?;
    t.go_offline();
    let pending = t.seed_customer("Offline").await;

    t.engine.business().reload(true).await?;
    let customers = t.engine.business().customers();
    assert!(customers.get(&pending.id).unwrap().is_pending());
    assert!(customers.get(&confirmed.id).is_some());
    Ok(())
}

#[tokio::test]
async fn test_delete_after_reconnect_waits_for_queued_create() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(20)).await;
    let customer = t.seed_customer("Ali").await;

    t.go_offline();
    let sale = credit_sale(&customer, "Sabri", dec!(5));
    let id = sale.id.clone();
    t.engine.business().add_sale(sale).await?;
    assert_eq!(t.stock("Sabri"), dec!(15));

    // back online, but the create has not been drained yet
    t.go_online();
    let deletes_before = t.remote.calls().deletes;
    let outcome = t.engine.business().delete_sale(&id).await?;
    assert!(outcome.is_pending());
    assert_eq!(t.engine.queue_depth(), 2);
    assert_eq!(t.remote.calls().deletes, deletes_before);
    assert_eq!(t.stock("Sabri"), dec!(20));

    let report = t.engine.drain().await?;
    assert_eq!(report.applied, 2);
    assert_eq!(report.remaining, 0);
    assert!(t.remote.row(Table::Sales, id.as_str()).is_none());
    Ok(())
}

#[tokio::test]
async fn test_online_write_to_other_record_skips_queue() -> Result<()> {
    let t = TestEngine::new();
    t.go_offline();
    let queued = t.seed_customer("Queued").await;

    t.go_online();
    let outcome = t
        .engine
        .business()
        .save_customer(Customer::new("Direct", "712"))
        .await?;
    assert!(!outcome.is_pending());
    assert!(t.remote.row(Table::Customers, outcome.record().id.as_str()).is_some());
    assert_eq!(t.engine.queue_depth(), 1);
    assert!(t.remote.row(Table::Customers, queued.id.as_str()).is_none());

    t.engine.drain().await?;
    assert!(t.remote.row(Table::Customers, queued.id.as_str()).is_some());
    Ok(())
}

#[tokio::test]
async fn test_offline_create_edit_delete_sale_converges() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(20)).await;
    let customer = t.seed_customer("Ali").await;
    t.go_offline();

    let mut sale = credit_sale(&customer, "Sabri", dec!(5));
    let id = sale.id.clone();
    t.engine.business().add_sale(sale.clone()).await?;
    sale.quantity = dec!(8);
    t.engine.business().add_sale(sale).await?;
    assert_eq!(t.stock("Sabri"), dec!(12));
    t.engine.business().delete_sale(&id).await?;
    assert_eq!(t.stock("Sabri"), dec!(20));

    let actions: Vec<&str> = t
        .engine
        .repository()
        .pending_operations()?
        .iter()
        .map(|op| op.operation.action())
        .collect();
    assert_eq!(actions, vec!["upsert_sale", "upsert_sale", "delete_record"]);

    t.go_online();
    let report = t.engine.drain().await?;
    assert_eq!(report.applied, 3);
    assert!(t.remote.row(Table::Sales, id.as_str()).is_none());
    assert!(t.engine.business().sales().get(&id).is_none());
    Ok(())
}

#[tokio::test]
async fn test_reload_keeps_offline_edit() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(20)).await;
    let customer = t.seed_customer("Ali").await;
    let mut sale = credit_sale(&customer, "Sabri", dec!(5));
    let id = sale.id.clone();
    t.engine.business().add_sale(sale.clone()).await?;
    t.engine.reload(true).await?;

    t.go_offline();
    sale.quantity = dec!(8);
    t.engine.business().add_sale(sale).await?;
    t.engine.reload(true).await?;

    let entry = t.engine.business().sales().get(&id).unwrap();
    assert!(entry.is_pending());
    assert_eq!(entry.record.quantity, dec!(8));
    assert_eq!(t.engine.queue_depth(), 1);
    Ok(())
}
