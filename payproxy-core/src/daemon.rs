use crate::config::ProxyConfig;
use crate::Result;
use async_trait::async_trait;

/// Lifecycle of the payout proxy process
#[async_trait]
pub trait Daemon: Send + Sync {
    /// Start the daemon with the given configuration
    async fn start(&mut self, config: ProxyConfig) -> Result<()>;

    /// Stop accepting miners and close open connections
    async fn stop(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;

    fn uptime(&self) -> std::time::Duration;
}
