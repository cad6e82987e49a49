use anyhow::Context;
use clap::Parser;
use payproxy_core::{init_logging, Daemon, ProxyConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info};

pub mod api;
pub mod daemon;

use daemon::PayoutProxyDaemon;

/// Stratum proxy that queues payouts for accepted shares
#[derive(Parser, Debug)]
#[command(name = "payproxyd", version, about)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "payproxyd.toml")]
    config: PathBuf,

    /// Port miners connect to
    #[arg(long)]
    listen_port: Option<u16>,

    /// Upstream pool host
    #[arg(long)]
    upstream_host: Option<String>,

    /// Upstream pool port
    #[arg(long)]
    upstream_port: Option<u16>,

    /// Account every miner login must use
    #[arg(long)]
    pool_account: Option<String>,

    /// Fraction of each payout kept as fee
    #[arg(long)]
    fee: Option<f64>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        if let Some(port) = self.listen_port {
            overrides.insert("proxy.listen_port".to_string(), port.to_string());
        }
        if let Some(host) = &self.upstream_host {
            overrides.insert("proxy.upstream_host".to_string(), host.clone());
        }
        if let Some(port) = self.upstream_port {
            overrides.insert("proxy.upstream_port".to_string(), port.to_string());
        }
        if let Some(account) = &self.pool_account {
            overrides.insert("proxy.pool_account".to_string(), account.clone());
        }
        if let Some(fee) = self.fee {
            overrides.insert("proxy.fee_fraction".to_string(), fee.to_string());
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ProxyConfig::load_from_sources(Some(&cli.config), Some(cli.overrides()))
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    if cli.print_config {
        let rendered = toml_preview(&config)?;
        println!("{}", rendered);
        return Ok(());
    }

    init_logging(&config.logging).context("Failed to initialize logging")?;
    info!(
        "Starting payproxyd: listening on {}, upstream {}",
        config.proxy.listen_socket(),
        config.proxy.upstream_endpoint()
    );

    let mut daemon = PayoutProxyDaemon::new()?;

    if let Err(e) = daemon.start(config).await {
        error!("Failed to start daemon: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = daemon.run_until_shutdown().await {
        error!("Daemon error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Effective configuration with the RPC password masked
fn toml_preview(config: &ProxyConfig) -> anyhow::Result<String> {
    let mut shown = config.clone();
    shown.rpc.password = "********".to_string();
    Ok(toml::to_string_pretty(&shown)?)
}
