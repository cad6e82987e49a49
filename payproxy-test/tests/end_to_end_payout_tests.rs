// End-to-end payout scenarios through a real proxy listener
use payproxy_core::PayoutRecord;
use payproxy_test::{ProxyHarness, TestUtils, MINER_ADDRESS};
use std::time::Duration;
use tokio::time::{sleep, timeout};

const TARGET: &str = "1d00ffff";
const DIFFICULTY: f64 = 52112.5;
const FEE: f64 = 0.02;

#[tokio::test]
async fn test_accepted_share_queues_one_payout() -> anyhow::Result<()> {
    let (harness, store) = ProxyHarness::with_mock_store(DIFFICULTY, FEE).await?;
    let (mut miner, mut pool) = harness.connect_miner().await?;
    harness.prepare_session(&mut miner, &mut pool, TARGET).await?;

    miner.send(&TestUtils::submit(2, "job1")).await?;
    assert_eq!(pool.recv().await?["method"], "mining.submit");
    pool.send(&TestUtils::accepted(2)).await?;
    assert_eq!(miner.recv().await?, TestUtils::accepted(2));

    let records = timeout(Duration::from_secs(5), store.wait_for(1)).await?;
    let expected = TestUtils::share_value(DIFFICULTY, TARGET) * (1.0 - FEE);
    assert_eq!(records, vec![PayoutRecord::new(MINER_ADDRESS, expected)]);
    assert!(!records[0].processed);
    assert_eq!(harness.metrics.summary().payouts_total, 1);

    harness.shutdown().await
}

#[tokio::test]
async fn test_every_accepted_share_is_paid() -> anyhow::Result<()> {
    let (harness, store) = ProxyHarness::with_mock_store(DIFFICULTY, 0.0).await?;
    let (mut miner, mut pool) = harness.connect_miner().await?;
    harness.prepare_session(&mut miner, &mut pool, TARGET).await?;

    for id in 2..5 {
        miner.send(&TestUtils::submit(id, "job1")).await?;
        pool.recv().await?;
    }
    for id in 2..5 {
        pool.send(&TestUtils::accepted(id)).await?;
    }

    let records = timeout(Duration::from_secs(5), store.wait_for(3)).await?;
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.address == MINER_ADDRESS));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_response_pays_once() -> anyhow::Result<()> {
    let (harness, store) = ProxyHarness::with_mock_store(DIFFICULTY, 0.0).await?;
    let (mut miner, mut pool) = harness.connect_miner().await?;
    harness.prepare_session(&mut miner, &mut pool, TARGET).await?;

    miner.send(&TestUtils::submit(2, "job1")).await?;
    pool.recv().await?;
    pool.send(&TestUtils::accepted(2)).await?;
    pool.send(&TestUtils::accepted(2)).await?;

    // Both responses reach the miner
    miner.recv().await?;
    miner.recv().await?;

    // A later submission is processed after the duplicate
    miner.send(&TestUtils::submit(3, "job1")).await?;
    pool.recv().await?;
    pool.send(&TestUtils::accepted(3)).await?;
    miner.recv().await?;

    let records = timeout(Duration::from_secs(5), store.wait_for(2)).await?;
    assert_eq!(records.len(), 2);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(store.records().await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_staged_target_applies_from_next_job() -> anyhow::Result<()> {
    let (harness, store) = ProxyHarness::with_mock_store(DIFFICULTY, 0.0).await?;
    let (mut miner, mut pool) = harness.connect_miner().await?;
    harness.prepare_session(&mut miner, &mut pool, TARGET).await?;

    let harder = "0fffff";
    pool.send(&TestUtils::set_target(harder)).await?;
    miner.recv().await?;

    // Still on job1, so the first target applies
    miner.send(&TestUtils::submit(2, "job1")).await?;
    pool.recv().await?;
    pool.send(&TestUtils::accepted(2)).await?;
    miner.recv().await?;
    timeout(Duration::from_secs(5), store.wait_for(1)).await?;

    pool.send_raw(&TestUtils::notify_raw("job2")).await?;
    miner.recv().await?;
    miner.send(&TestUtils::submit(3, "job2")).await?;
    pool.recv().await?;
    pool.send(&TestUtils::accepted(3)).await?;
    miner.recv().await?;

    let records = timeout(Duration::from_secs(5), store.wait_for(2)).await?;
    assert_eq!(records[0].amount, TestUtils::share_value(DIFFICULTY, TARGET));
    assert_eq!(records[1].amount, TestUtils::share_value(DIFFICULTY, harder));
    assert!(records[1].amount > records[0].amount);
    Ok(())
}

#[tokio::test]
async fn test_unknown_response_id_does_not_pay() -> anyhow::Result<()> {
    let (harness, store) = ProxyHarness::with_mock_store(DIFFICULTY, 0.0).await?;
    let (mut miner, mut pool) = harness.connect_miner().await?;
    harness.prepare_session(&mut miner, &mut pool, TARGET).await?;

    pool.send(&TestUtils::accepted(42)).await?;
    assert_eq!(miner.recv().await?, TestUtils::accepted(42));

    // The session is still relaying
    miner.send(&TestUtils::subscribe(7)).await?;
    assert_eq!(pool.recv().await?, TestUtils::subscribe(7));

    sleep(Duration::from_millis(100)).await;
    assert!(store.records().await.is_empty());
    assert_eq!(harness.metrics.summary().submissions_resolved, 0);
    Ok(())
}

#[tokio::test]
async fn test_unrecognized_frames_pass_through_verbatim() -> anyhow::Result<()> {
    let (harness, _store) = ProxyHarness::with_mock_store(DIFFICULTY, 0.0).await?;
    let (mut miner, mut pool) = harness.connect_miner().await?;

    let extranonce = "{\"id\":3,\"method\":\"mining.extranonce.subscribe\",\"params\":[]}\r\n";
    miner.send_raw(extranonce).await?;
    assert_eq!(pool.recv_raw_line().await?.as_deref(), Some(extranonce));

    let notify = TestUtils::notify_raw("job9");
    pool.send_raw(&notify).await?;
    let first = miner.recv_raw_line().await?.unwrap_or_default();
    let second = miner.recv_raw_line().await?.unwrap_or_default();
    assert_eq!(format!("{}{}", first, second), notify);
    Ok(())
}

#[tokio::test]
async fn test_sessions_are_independent() -> anyhow::Result<()> {
    let (harness, store) = ProxyHarness::with_mock_store(DIFFICULTY, 0.0).await?;

    let (mut first_miner, mut first_pool) = harness.connect_miner().await?;
    harness.prepare_session(&mut first_miner, &mut first_pool, TARGET).await?;
    let (mut second_miner, mut second_pool) = harness.connect_miner().await?;

    // The second miner never authorized, so an accepted share there is fatal
    second_miner.send(&TestUtils::submit(2, "job1")).await?;
    second_pool.recv().await?;
    second_pool.send(&TestUtils::accepted(2)).await?;
    second_miner.expect_closed().await?;

    // The first session is unaffected
    first_miner.send(&TestUtils::submit(2, "job1")).await?;
    first_pool.recv().await?;
    first_pool.send(&TestUtils::accepted(2)).await?;
    let records = timeout(Duration::from_secs(5), store.wait_for(1)).await?;
    assert_eq!(records[0].address, MINER_ADDRESS);
    Ok(())
}

#[tokio::test]
async fn test_acceptance_then_pool_close_still_pays() -> anyhow::Result<()> {
    let (harness, store) = ProxyHarness::with_mock_store(DIFFICULTY, 0.0).await?;
    let (mut miner, mut pool) = harness.connect_miner().await?;
    harness.prepare_session(&mut miner, &mut pool, TARGET).await?;

    miner.send(&TestUtils::submit(2, "job1")).await?;
    pool.recv().await?;
    pool.send(&TestUtils::accepted(2)).await?;
    drop(pool);

    assert_eq!(miner.recv().await?, TestUtils::accepted(2));
    miner.expect_closed().await?;

    let records = timeout(Duration::from_secs(5), store.wait_for(1)).await?;
    assert_eq!(records, vec![PayoutRecord::new(MINER_ADDRESS, TestUtils::share_value(DIFFICULTY, TARGET))]);
    Ok(())
}
