/// Stock and ledger integration tests
///
/// Sales, purchases, returns and waste move category stock through the
/// optimistic services; rejected mutations must leave everything untouched.

use anyhow::Result;
use rust_decimal_macros::dec;
use serde_json::json;
use tally_core::records::{NotificationKind, Purchase, Settings, Waste};
use tally_core::{Currency, Error, PaymentStatus, RecordId, Table, ValidationError};
use tally_test_utils::{credit_sale, TestEngine};

#[tokio::test]
async fn test_sale_edit_moves_stock_by_difference() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(100)).await;
    let customer = t.seed_customer("Ali").await;

    let mut sale = credit_sale(&customer, "Sabri", dec!(10));
    t.engine.business().add_sale(sale.clone()).await?;
    assert_eq!(t.stock("Sabri"), dec!(90));

    sale.quantity = dec!(15);
    t.engine.business().add_sale(sale.clone()).await?;
    assert_eq!(t.stock("Sabri"), dec!(85));

    sale.quantity = dec!(5);
    t.engine.business().add_sale(sale).await?;
    assert_eq!(t.stock("Sabri"), dec!(95));
    Ok(())
}

#[tokio::test]
async fn test_sale_category_change_moves_both() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(50)).await;
    t.seed_category("Hamdani", dec!(50)).await;
    let customer = t.seed_customer("Ali").await;

    let mut sale = credit_sale(&customer, "Sabri", dec!(10));
    t.engine.business().add_sale(sale.clone()).await?;
    sale.qat_type = "Hamdani".into();
    t.engine.business().add_sale(sale).await?;

    assert_eq!(t.stock("Sabri"), dec!(50));
    assert_eq!(t.stock("Hamdani"), dec!(40));
    Ok(())
}

#[tokio::test]
async fn test_edit_may_reuse_own_quantity() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(10)).await;
    let customer = t.seed_customer("Ali").await;

    let mut sale = credit_sale(&customer, "Sabri", dec!(10));
    t.engine.business().add_sale(sale.clone()).await?;
    assert_eq!(t.stock("Sabri"), dec!(0));

    sale.quantity = dec!(8);
    t.engine.business().add_sale(sale).await?;
    assert_eq!(t.stock("Sabri"), dec!(2));
    Ok(())
}

#[tokio::test]
async fn test_insufficient_stock_never_mutates() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(3)).await;
    let customer = t.seed_customer("Ali").await;
    let calls_before = t.remote.calls();
    t.sink.clear();

    let sale = credit_sale(&customer, "Sabri", dec!(4));
    let err = t.engine.business().add_sale(sale).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InsufficientStock { .. })
    ));

    assert_eq!(t.stock("Sabri"), dec!(3));
    assert!(t.engine.business().sales().is_empty());
    assert_eq!(t.engine.queue_depth(), 0);
    assert_eq!(t.remote.calls(), calls_before);
    assert_eq!(t.sink.count(NotificationKind::Warning), 1);
    Ok(())
}

#[tokio::test]
async fn test_negative_stock_allowed_by_setting() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(3)).await;
    let customer = t.seed_customer("Ali").await;

    let mut settings = Settings::default();
    settings.accounting_settings.allow_negative_stock = true;
    t.engine.finance().update_settings(settings).await?;

    t.engine
        .business()
        .add_sale(credit_sale(&customer, "Sabri", dec!(5)))
        .await?;
    assert_eq!(t.stock("Sabri"), dec!(-2));
    Ok(())
}

#[tokio::test]
async fn test_invalid_input_never_mutates() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(10)).await;
    let customer = t.seed_customer("Ali").await;

    let zero = credit_sale(&customer, "Sabri", dec!(0));
    let err = t.engine.business().add_sale(zero).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION");

    let mut orphan = credit_sale(&customer, "Sabri", dec!(1));
    orphan.customer_id = RecordId::from_str("");
    let err = t.engine.business().add_sale(orphan).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::MissingCounterparty(_))
    ));

    assert_eq!(t.stock("Sabri"), dec!(10));
    assert!(t.engine.business().sales().is_empty());
    assert_eq!(t.engine.queue_depth(), 0);
    Ok(())
}

#[tokio::test]
async fn test_waste_floors_at_zero_and_restores_exactly() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(5)).await;

    let waste = Waste::new("Sabri", dec!(8), "dried out");
    let id = waste.id.clone();
    t.engine.finance().add_waste(waste).await?;
    assert_eq!(t.stock("Sabri"), dec!(0));

    t.engine.finance().delete_waste(&id).await?;
    assert_eq!(t.stock("Sabri"), dec!(5));
    Ok(())
}

#[tokio::test]
async fn test_waste_edit_reverts_prior_amount() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(10)).await;

    let mut waste = Waste::new("Sabri", dec!(4), "damaged");
    t.engine.finance().add_waste(waste.clone()).await?;
    assert_eq!(t.stock("Sabri"), dec!(6));

    waste.quantity = dec!(12);
    t.engine.finance().add_waste(waste.clone()).await?;
    assert_eq!(t.stock("Sabri"), dec!(0));

    waste.quantity = dec!(1);
    t.engine.finance().add_waste(waste).await?;
    assert_eq!(t.stock("Sabri"), dec!(9));
    Ok(())
}

#[tokio::test]
async fn test_double_return_is_rejected() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(20)).await;
    let customer = t.seed_customer("Ali").await;
    let sale = credit_sale(&customer, "Sabri", dec!(5));
    let id = sale.id.clone();
    t.engine.business().add_sale(sale).await?;
    assert_eq!(t.stock("Sabri"), dec!(15));

    let outcome = t.engine.business().return_sale(&id).await?;
    assert!(!outcome.is_pending());
    assert_eq!(t.stock("Sabri"), dec!(20));
    let procedures = t.remote.calls().procedures;

    let err = t.engine.business().return_sale(&id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::AlreadyReturned(_))
    ));
    assert_eq!(t.stock("Sabri"), dec!(20));
    assert_eq!(t.remote.calls().procedures, procedures);
    Ok(())
}

#[tokio::test]
async fn test_returned_sale_cannot_be_edited() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(20)).await;
    let customer = t.seed_customer("Ali").await;
    let mut sale = credit_sale(&customer, "Sabri", dec!(5));
    t.engine.business().add_sale(sale.clone()).await?;
    t.engine.business().return_sale(&sale.id).await?;

    sale.quantity = dec!(6);
    let err = t.engine.business().add_sale(sale).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
    assert_eq!(t.stock("Sabri"), dec!(20));
    Ok(())
}

#[tokio::test]
async fn test_purchase_return_and_delete() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(10)).await;
    let supplier = t.seed_supplier("Farm").await;

    let purchase = Purchase::new(
        supplier.id.clone(),
        supplier.name.clone(),
        "Sabri",
        dec!(30),
        dec!(2),
        PaymentStatus::Cash,
        Currency::YER,
    );
    let id = purchase.id.clone();
    t.engine.business().add_purchase(purchase).await?;
    assert_eq!(t.stock("Sabri"), dec!(40));

    t.engine.business().return_purchase(&id).await?;
    assert_eq!(t.stock("Sabri"), dec!(10));

    // a returned purchase no longer holds stock, so deleting it moves nothing
    t.engine.business().delete_purchase(&id).await?;
    assert_eq!(t.stock("Sabri"), dec!(10));
    Ok(())
}

#[tokio::test]
async fn test_customer_balance_excludes_returns() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(100)).await;
    let customer = t.seed_customer("Ali").await;

    let first = credit_sale(&customer, "Sabri", dec!(2));
    let second = credit_sale(&customer, "Sabri", dec!(3));
    t.engine.business().add_sale(first.clone()).await?;
    t.engine.business().add_sale(second).await?;
    t.engine.business().return_sale(&first.id).await?;

    let balances = t.engine.finance().customer_balances(&customer.id);
    let yer = balances
        .iter()
        .find(|b| b.currency == Currency::YER)
        .unwrap();
    assert_eq!(yer.amount, dec!(30));
    assert_eq!(yer.pending_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_create_edit_return_restores_stock() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(20)).await;
    let customer = t.seed_customer("Ali").await;

    let mut sale = credit_sale(&customer, "Sabri", dec!(5));
    let id = sale.id.clone();
    t.engine.business().add_sale(sale.clone()).await?;
    assert_eq!(t.stock("Sabri"), dec!(15));

    sale.quantity = dec!(8);
    t.engine.business().add_sale(sale).await?;
    assert_eq!(t.stock("Sabri"), dec!(12));

    t.engine.business().return_sale(&id).await?;
    assert_eq!(t.stock("Sabri"), dec!(20));
    Ok(())
}

#[tokio::test]
async fn test_reload_reapplies_queued_sale() -> Result<()> {
    let t = TestEngine::new();
    t.seed_category("Sabri", dec!(20)).await;
    let customer = t.seed_customer("Ali").await;
    t.engine.reload(true).await?;
    assert_eq!(t.stock("Sabri"), dec!(20));

    t.go_offline();
    t.engine
        .business()
        .add_sale(credit_sale(&customer, "Sabri", dec!(5)))
        .await?;
    assert_eq!(t.stock("Sabri"), dec!(15));

    t.engine.reload(true).await?;
    assert_eq!(t.stock("Sabri"), dec!(15));
    assert_eq!(t.engine.queue_depth(), 1);

    // online, the fetched stock is replayed over before the queue drains
    t.go_online();
    let report = t.engine.reload(true).await?;
    assert_eq!(report.applied, 1);
    assert_eq!(t.stock("Sabri"), dec!(15));
    Ok(())
}

#[tokio::test]
async fn test_reload_replays_queued_edit_and_waste() -> Result<()> {
    let t = TestEngine::new();
    let category = t.seed_category("Sabri", dec!(20)).await;
    let customer = t.seed_customer("Ali").await;
    let mut sale = credit_sale(&customer, "Sabri", dec!(5));
    t.engine.business().add_sale(sale.clone()).await?;

    // the remote store keeps stock itself; mirror what it did for the sale
    let mut row = t.remote.row(Table::Categories, category.id.as_str()).unwrap();
    row["stock"] = json!(15);
    t.remote.seed(Table::Categories, row);
    t.engine.reload(true).await?;
    assert_eq!(t.stock("Sabri"), dec!(15));

    t.go_offline();
    sale.quantity = dec!(8);
    t.engine.business().add_sale(sale).await?;
    t.engine
        .finance()
        .add_waste(Waste::new("Sabri", dec!(2), "damaged"))
        .await?;
    assert_eq!(t.stock("Sabri"), dec!(10));

    t.engine.reload(true).await?;
    assert_eq!(t.stock("Sabri"), dec!(10));
    assert_eq!(t.engine.queue_depth(), 2);
    Ok(())
}

#[tokio::test]
async fn test_restart_keeps_queued_stock_movements() -> Result<()> {
    let t = TestEngine::durable();
    t.seed_category("Sabri", dec!(20)).await;
    let customer = t.seed_customer("Ali").await;
    t.go_offline();
    t.engine
        .business()
        .add_sale(credit_sale(&customer, "Sabri", dec!(5)))
        .await?;
    assert_eq!(t.stock("Sabri"), dec!(15));

    let t = t.reopen();
    t.go_online();
    let report = t.engine.reload(true).await?;
    assert_eq!(report.applied, 1);
    assert_eq!(t.stock("Sabri"), dec!(15));
    Ok(())
}
