// Payouts persisted through the SQLite-backed store
use payproxy_core::{DatabasePool, StaticDifficultyOracle};
use payproxy_test::{ProxyHarness, TestUtils, MINER_ADDRESS};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const TARGET: &str = "1d00ffff";

async fn sqlite_pool(dir: &tempfile::TempDir) -> anyhow::Result<DatabasePool> {
    let url = format!("sqlite://{}", dir.path().join("payouts.db").display());
    let pool = DatabasePool::new(&url, 2).await?;
    pool.migrate().await?;
    Ok(pool)
}

async fn wait_for_payouts(pool: &DatabasePool, count: u64) -> anyhow::Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while pool.get_stats().await?.total_payouts < count {
        anyhow::ensure!(Instant::now() < deadline, "payout was never persisted");
        sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

#[tokio::test]
async fn test_accepted_share_is_persisted_unprocessed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let database = Arc::new(sqlite_pool(&dir).await?);

    let harness = ProxyHarness::start(Arc::new(StaticDifficultyOracle::new(2.0)), database.clone(), 0.1).await?;
    let (mut miner, mut pool) = harness.connect_miner().await?;
    harness.prepare_session(&mut miner, &mut pool, TARGET).await?;

    miner.send(&TestUtils::submit(2, "job1")).await?;
    pool.recv().await?;
    pool.send(&TestUtils::accepted(2)).await?;

    wait_for_payouts(&database, 1).await?;

    let records = database.recent_payouts(10).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].address, MINER_ADDRESS);
    assert!(!records[0].processed);
    let expected = TestUtils::share_value(2.0, TARGET) * (1.0 - 0.1);
    assert!((records[0].amount - expected).abs() <= expected.abs() * 1e-12);

    let stats = database.get_stats().await?;
    assert_eq!(stats.unprocessed_payouts, 1);
    Ok(())
}

#[tokio::test]
async fn test_database_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let database = Arc::new(sqlite_pool(&dir).await?);
        let harness = ProxyHarness::start(Arc::new(StaticDifficultyOracle::new(2.0)), database.clone(), 0.0).await?;
        let (mut miner, mut pool) = harness.connect_miner().await?;
        harness.prepare_session(&mut miner, &mut pool, TARGET).await?;
        miner.send(&TestUtils::submit(2, "job1")).await?;
        pool.recv().await?;
        pool.send(&TestUtils::accepted(2)).await?;
        wait_for_payouts(&database, 1).await?;
        harness.shutdown().await?;
    }

    // Migrations are idempotent and earlier records remain queued
    let reopened = sqlite_pool(&dir).await?;
    assert_eq!(reopened.get_stats().await?.total_payouts, 1);
    Ok(())
}
