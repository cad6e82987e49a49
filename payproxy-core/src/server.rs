// TCP listener for miner connections
use crate::{
    error::{Error, Result},
    supervisor::{ConnectionSupervisor, ProxyContext},
};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, task::JoinSet};
use tracing::{debug, error, info};

/// Accepts miners and pairs each with its own upstream connection
pub struct ProxyServer {
    listener: TcpListener,
    context: Arc<ProxyContext>,
}

impl ProxyServer {
    pub async fn bind(bind_address: SocketAddr, context: Arc<ProxyContext>) -> Result<Self> {
        let listener = TcpListener::bind(bind_address).await
            .map_err(|e| Error::Transport(format!("Failed to bind to {}: {}", bind_address, e)))?;
        Ok(Self { listener, context })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves, then abort the
    /// connections still running
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Proxy listening on {}, upstream {}", self.local_addr()?, self.context.upstream);

        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            self.context.metrics.connections_total.inc();
                            let supervisor = ConnectionSupervisor::new(peer_addr, Arc::clone(&self.context));
                            info!("Accepted connection from {}: {}", peer_addr, supervisor.connection_id());
                            connections.spawn(supervisor.run(stream));
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("Connection task failed: {}", e);
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutting down proxy listener");
                    break;
                }
            }
        }

        debug!("Aborting {} open connections", connections.len());
        connections.shutdown().await;
        Ok(())
    }
}
