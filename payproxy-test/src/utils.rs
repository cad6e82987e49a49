use crate::mocks::{LineConnection, MockPool};
use anyhow::Result;
use num_bigint::BigUint;
use payproxy_core::{
    config::{PayoutConfig, RelayConfig},
    DifficultyOracle, MockPayoutStore, PayoutFormula, PayoutStore, PayoutTrigger, ProxyContext, ProxyMetrics,
    ProxyServer, ShareValueFormula, StaticDifficultyOracle,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const POOL_ACCOUNT: &str = "t1YtcRXgoDsVj6sDhGA71sgdDLoR9Q1QcnL";
pub const MINER_ADDRESS: &str = "t1Minerxxxxxxxxxxxxxxxxxxxxxxxxxxxx";

/// Builders for the Stratum traffic used across the scenarios
pub struct TestUtils;

impl TestUtils {
    pub fn login() -> String {
        format!("{}.{}", POOL_ACCOUNT, MINER_ADDRESS)
    }

    pub fn subscribe(id: u64) -> Value {
        json!({"id": id, "method": "mining.subscribe", "params": ["test-miner/1.0", null]})
    }

    pub fn authorize(id: u64, login: &str) -> Value {
        json!({"id": id, "method": "mining.authorize", "params": [login, "x"]})
    }

    pub fn set_target(target_hex: &str) -> Value {
        json!({"id": null, "method": "mining.set_target", "params": [target_hex]})
    }

    /// Notify frame as flypool sends it, followed by an empty line
    pub fn notify_raw(job_id: &str) -> String {
        format!(
            "{}\n\n",
            json!({"id": null, "method": "mining.notify", "params": [job_id, "04000000", "00", "00", "00", "5b0fa55c", "1d00ffff", true]})
        )
    }

    pub fn submit(id: u64, job_id: &str) -> Value {
        json!({"id": id, "method": "mining.submit", "params": [Self::login(), job_id, "5b0fa55c", "00000000", "0000"]})
    }

    pub fn accepted(id: u64) -> Value {
        json!({"id": id, "result": true, "error": null})
    }

    pub fn rejected(id: u64) -> Value {
        json!({"id": id, "result": null, "error": [23, "Low difficulty share", null]})
    }

    /// Value of one accepted share at `target_hex`, before fees
    pub fn share_value(network_difficulty: f64, target_hex: &str) -> f64 {
        let target = BigUint::parse_bytes(target_hex.as_bytes(), 16).unwrap_or_default();
        Self::formula()
            .compute(network_difficulty, &target)
            .unwrap_or(f64::NAN)
    }

    pub fn formula() -> ShareValueFormula {
        match ShareValueFormula::from_config(&PayoutConfig::default()) {
            Ok(formula) => formula,
            Err(e) => panic!("default payout config is invalid: {}", e),
        }
    }

    /// Route `tracing` output to the test harness; safe to call repeatedly
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// A running proxy in front of a [`MockPool`]
pub struct ProxyHarness {
    pub pool: MockPool,
    pub proxy_addr: SocketAddr,
    pub metrics: Arc<ProxyMetrics>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<payproxy_core::Result<()>>>,
}

impl ProxyHarness {
    /// Proxy with the default share formula and the given collaborators
    pub async fn start(
        oracle: Arc<dyn DifficultyOracle>,
        store: Arc<dyn PayoutStore>,
        fee_fraction: f64,
    ) -> Result<Self> {
        TestUtils::init_tracing();

        let pool = MockPool::bind().await?;
        let upstream = pool.local_addr()?;

        let config = RelayConfig {
            listen_address: "127.0.0.1".parse()?,
            listen_port: 0,
            upstream_host: upstream.ip().to_string(),
            upstream_port: upstream.port(),
            pool_account: POOL_ACCOUNT.to_string(),
            fee_fraction,
            ..RelayConfig::default()
        };

        let trigger = Arc::new(PayoutTrigger::new(oracle, Arc::new(TestUtils::formula()), store, fee_fraction));
        let metrics = Arc::new(ProxyMetrics::new()?);
        let context = Arc::new(ProxyContext::new(&config, trigger, metrics.clone()));

        let server = ProxyServer::bind(config.listen_socket(), context).await?;
        let proxy_addr = server.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async move {
            let _ = shutdown_rx.await;
        }));

        Ok(Self {
            pool,
            proxy_addr,
            metrics,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Proxy backed by a [`MockPayoutStore`] and a fixed difficulty
    pub async fn with_mock_store(network_difficulty: f64, fee_fraction: f64) -> Result<(Self, Arc<MockPayoutStore>)> {
        let store = Arc::new(MockPayoutStore::new());
        let harness = Self::start(
            Arc::new(StaticDifficultyOracle::new(network_difficulty)),
            store.clone(),
            fee_fraction,
        )
        .await?;
        Ok((harness, store))
    }

    /// Connect a miner and return it together with the pool's end of the
    /// same proxied session
    pub async fn connect_miner(&self) -> Result<(LineConnection, LineConnection)> {
        let miner = LineConnection::connect(self.proxy_addr).await?;
        let upstream = self.pool.accept().await?;
        Ok((miner, upstream))
    }

    /// Authorize, set `target_hex` and start a job, checking each frame
    /// arrives on the other side
    pub async fn prepare_session(
        &self,
        miner: &mut LineConnection,
        pool: &mut LineConnection,
        target_hex: &str,
    ) -> Result<()> {
        miner.send(&TestUtils::authorize(1, &TestUtils::login())).await?;
        anyhow::ensure!(pool.recv().await?["method"] == "mining.authorize", "authorize not relayed");
        pool.send(&json!({"id": 1, "result": true, "error": null})).await?;
        miner.recv().await?;

        pool.send(&TestUtils::set_target(target_hex)).await?;
        pool.send_raw(&TestUtils::notify_raw("job1")).await?;
        anyhow::ensure!(miner.recv().await?["method"] == "mining.set_target", "set_target not relayed");
        anyhow::ensure!(miner.recv().await?["method"] == "mining.notify", "notify not relayed");
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await??;
        }
        Ok(())
    }
}

impl Drop for ProxyHarness {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
