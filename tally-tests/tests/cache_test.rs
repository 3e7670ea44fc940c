/// Read cache and snapshot integration tests

use anyhow::Result;
use std::time::Duration;
use tally_core::records::Customer;
use tally_sync::RemoteError;
use tally_test_utils::TestEngine;

#[tokio::test]
async fn test_memory_cache_ttl_boundary() -> Result<()> {
    let t = TestEngine::new();
    t.seed_customer("Ali").await;
    let repo = t.engine.repository();

    let first = repo.fetch::<Customer>(false).await?;
    assert_eq!(first.len(), 1);
    assert_eq!(t.remote.calls().queries, 1);

    t.clock.advance(Duration::from_millis(29_999));
    repo.fetch::<Customer>(false).await?;
    assert_eq!(t.remote.calls().queries, 1);

    t.clock.advance(Duration::from_millis(1));
    repo.fetch::<Customer>(false).await?;
    assert_eq!(t.remote.calls().queries, 2);
    Ok(())
}

#[tokio::test]
async fn test_force_fresh_bypasses_cache() -> Result<()> {
    let t = TestEngine::new();
    let repo = t.engine.repository();
    repo.fetch::<Customer>(false).await?;
    repo.fetch::<Customer>(true).await?;
    assert_eq!(t.remote.calls().queries, 2);
    Ok(())
}

#[tokio::test]
async fn test_offline_fetch_uses_snapshot_until_stale() -> Result<()> {
    let t = TestEngine::new();
    t.seed_customer("Ali").await;
    let repo = t.engine.repository();
    repo.fetch::<Customer>(false).await?;

    t.go_offline();
    t.clock.advance(Duration::from_secs(60));
    let cached = repo.fetch::<Customer>(false).await?;
    assert_eq!(cached.len(), 1);
    assert_eq!(t.remote.calls().queries, 1);

    t.clock.advance(Duration::from_secs(10 * 60));
    let stale = repo.fetch::<Customer>(false).await?;
    assert!(stale.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_remote_failure_falls_back_to_snapshot() -> Result<()> {
    let t = TestEngine::new();
    t.seed_customer("Ali").await;
    let repo = t.engine.repository();
    repo.fetch::<Customer>(false).await?;

    t.remote.fail_next(RemoteError::Network("connection reset".into()));
    let fallback = repo.fetch::<Customer>(true).await?;
    assert_eq!(fallback.len(), 1);
    assert_eq!(fallback[0].name, "Ali");
    Ok(())
}

#[tokio::test]
async fn test_clear_cache_keeps_queue() -> Result<()> {
    let t = TestEngine::new();
    t.seed_customer("Ali").await;
    t.engine.repository().fetch::<Customer>(false).await?;

    t.go_offline();
    t.seed_customer("Queued").await;
    assert_eq!(t.engine.queue_depth(), 1);

    t.engine.repository().clear_cache()?;
    assert_eq!(t.engine.queue_depth(), 1);
    assert!(t.engine.repository().fetch::<Customer>(false).await?.is_empty());

    t.go_online();
    let report = t.engine.drain().await?;
    assert_eq!(report.applied, 1);
    Ok(())
}
