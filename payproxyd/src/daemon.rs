use crate::api::{self, ApiState};
use async_trait::async_trait;
use payproxy_core::{
    Daemon, DatabasePool, Error, PayoutTrigger, ProxyConfig, ProxyContext, ProxyMetrics, ProxyServer, Result,
    RpcClient, ShareValueFormula,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{signal, sync::watch, task::JoinHandle};
use tracing::{error, info, warn};

/// Grace period for open connections once shutdown begins
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Wires the proxy listener, payout pipeline and monitoring endpoint
pub struct PayoutProxyDaemon {
    start_time: Option<Instant>,
    is_running: bool,
    metrics: Arc<ProxyMetrics>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    proxy_handle: Option<JoinHandle<Result<()>>>,
    api_handle: Option<JoinHandle<()>>,
}

impl PayoutProxyDaemon {
    pub fn new() -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            start_time: None,
            is_running: false,
            metrics: Arc::new(ProxyMetrics::new()?),
            shutdown_tx,
            shutdown_rx,
            proxy_handle: None,
            api_handle: None,
        })
    }

    /// Initialize database connection
    async fn init_database(&self, config: &ProxyConfig) -> Result<DatabasePool> {
        info!("Initializing database connection");

        let pool = DatabasePool::new(&config.database.url, config.database.max_connections).await?;

        if config.database.enable_migrations {
            info!("Running database migrations");
            pool.migrate().await?;
        }

        pool.health_check().await?;

        info!("Database initialized successfully");
        Ok(pool)
    }

    fn setup_signal_handlers(&self) {
        let shutdown_tx = self.shutdown_tx.clone();

        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                    let _ = shutdown_tx.send(true);
                }
                Err(err) => {
                    error!("Failed to listen for Ctrl+C: {}", err);
                }
            }
        });

        #[cfg(unix)]
        {
            let shutdown_tx = self.shutdown_tx.clone();
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut terminate) => {
                        if terminate.recv().await.is_some() {
                            info!("Received SIGTERM, initiating graceful shutdown");
                            let _ = shutdown_tx.send(true);
                        }
                    }
                    Err(err) => {
                        error!("Failed to listen for SIGTERM: {}", err);
                    }
                }
            });
        }
    }

    /// Run until a shutdown signal is received, then stop
    pub async fn run_until_shutdown(&mut self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        while !*shutdown_rx.borrow() {
            shutdown_rx
                .changed()
                .await
                .map_err(|e| Error::Internal(format!("Shutdown signal error: {}", e)))?;
        }
        info!("Shutdown signal received");
        self.stop().await
    }

    /// Request shutdown from another task
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }
}

#[async_trait]
impl Daemon for PayoutProxyDaemon {
    async fn start(&mut self, config: ProxyConfig) -> Result<()> {
        if self.is_running {
            return Err(Error::Internal("Daemon already running".to_string()));
        }
        config.validate()?;

        let database = Arc::new(self.init_database(&config).await?);

        let rpc = RpcClient::new(config.rpc.clone())?;
        match rpc.test_connection().await {
            Ok(()) => info!("Node RPC reachable at {}", config.rpc.url),
            // Not fatal here; each payout queries the node again
            Err(e) => warn!("Node RPC not reachable at {}: {}", config.rpc.url, e),
        }

        let formula = ShareValueFormula::from_config(&config.payout)?;
        let trigger = Arc::new(PayoutTrigger::new(
            Arc::new(rpc),
            Arc::new(formula),
            database.clone(),
            config.proxy.fee_fraction,
        ));

        let context = Arc::new(ProxyContext::new(&config.proxy, trigger, self.metrics.clone()));
        let server = ProxyServer::bind(config.proxy.listen_socket(), context).await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        self.proxy_handle = Some(tokio::spawn(server.run(async move {
            while shutdown_rx.changed().await.is_ok() {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        })));

        if config.monitoring.enable_metrics {
            let state = ApiState {
                metrics: self.metrics.clone(),
                database,
                started_at: Instant::now(),
            };
            let bind_address = config.monitoring.metrics_bind_address;
            let shutdown_rx = self.shutdown_rx.clone();
            self.api_handle = Some(tokio::spawn(async move {
                if let Err(e) = api::serve(bind_address, state, shutdown_rx).await {
                    error!("Monitoring endpoint error: {}", e);
                }
            }));
        }

        self.setup_signal_handlers();

        self.start_time = Some(Instant::now());
        self.is_running = true;
        info!("payproxyd started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.is_running {
            warn!("Daemon is not running");
            return Ok(());
        }
        info!("Stopping payproxyd");

        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.proxy_handle.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(Ok(()))) => info!("Proxy listener stopped"),
                Ok(Ok(Err(e))) => error!("Proxy listener error: {}", e),
                Ok(Err(e)) => error!("Proxy listener task failed: {}", e),
                Err(_) => warn!("Proxy listener did not stop within {:?}", SHUTDOWN_TIMEOUT),
            }
        }

        if let Some(handle) = self.api_handle.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                warn!("Monitoring endpoint did not stop in time");
            }
        }

        self.is_running = false;
        info!("payproxyd stopped gracefully");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.is_running
    }

    fn uptime(&self) -> Duration {
        self.start_time.map(|start| start.elapsed()).unwrap_or_default()
    }
}
