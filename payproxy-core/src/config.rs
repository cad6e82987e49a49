use crate::{Result, Error};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Main proxy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub proxy: RelayConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub payout: PayoutConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener, upstream pool and account settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: IpAddr,
    #[serde(default = "default_port")]
    pub listen_port: u16,
    pub upstream_host: String,
    #[serde(default = "default_port")]
    pub upstream_port: u16,
    /// The only pool account miners may authorize against
    pub pool_account: String,
    /// Fraction of every computed payout kept by the operator
    pub fee_fraction: f64,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

fn default_listen_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    3333
}

fn default_read_buffer_size() -> usize {
    4096
}

/// Node JSON-RPC endpoint used as the network difficulty oracle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub timeout_secs: u64,
}

/// Parameters of the share value payout formula
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PayoutConfig {
    /// Coins awarded per block
    pub block_reward: f64,
    /// Hex encoded maximum target (difficulty 1)
    pub pow_limit: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub enable_migrations: bool,
}

/// Monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enable_metrics: bool,
    pub metrics_bind_address: SocketAddr,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub level: String,
    /// Per-component log levels
    #[serde(default)]
    pub component_levels: HashMap<String, String>,
    /// Output format (json, pretty, compact)
    pub format: LogFormat,
    /// Log output destination
    pub output: LogOutput,
    /// Whether to redact credentials and payout addresses
    pub redact_sensitive_data: bool,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Log output options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogOutput {
    Stdout,
    File(PathBuf),
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: default_port(),
            upstream_host: "us1-zcash.flypool.org".to_string(),
            upstream_port: default_port(),
            pool_account: String::new(),
            fee_fraction: 0.0,
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8232".to_string(),
            user: "rpcuser".to_string(),
            password: "rpcpassword".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            block_reward: 3.125,
            pow_limit: "0007ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://payproxy.db".to_string(),
            max_connections: 5,
            enable_migrations: true,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            metrics_bind_address: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            component_levels: HashMap::new(),
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            redact_sensitive_data: false,
        }
    }
}

impl RelayConfig {
    /// Address the listener binds to
    pub fn listen_socket(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }

    /// `host:port` of the upstream pool
    pub fn upstream_endpoint(&self) -> String {
        format!("{}:{}", self.upstream_host, self.upstream_port)
    }
}

impl PayoutConfig {
    /// Decode the configured maximum target
    pub fn pow_limit_value(&self) -> Result<BigUint> {
        let hex = self.pow_limit.strip_prefix("0x").unwrap_or(&self.pow_limit);
        let value = BigUint::parse_bytes(hex.as_bytes(), 16)
            .ok_or_else(|| Error::Config(format!("Invalid pow_limit hex: {}", self.pow_limit)))?;
        if value.is_zero() {
            return Err(Error::Config("pow_limit must be greater than zero".to_string()));
        }
        Ok(value)
    }
}

impl ProxyConfig {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_relay()?;
        self.validate_rpc()?;
        self.validate_payout()?;
        self.validate_database()?;
        self.validate_logging()?;
        Ok(())
    }

    fn validate_relay(&self) -> Result<()> {
        let relay = &self.proxy;

        if relay.pool_account.trim().is_empty() {
            return Err(Error::Config("proxy.pool_account must be set".to_string()));
        }
        if relay.pool_account.contains('.') {
            return Err(Error::Config("proxy.pool_account must not contain '.'".to_string()));
        }
        if relay.upstream_host.trim().is_empty() {
            return Err(Error::Config("proxy.upstream_host must be set".to_string()));
        }
        if relay.listen_port == 0 {
            return Err(Error::Config("proxy.listen_port cannot be 0".to_string()));
        }
        if relay.upstream_port == 0 {
            return Err(Error::Config("proxy.upstream_port cannot be 0".to_string()));
        }
        if !(0.0..1.0).contains(&relay.fee_fraction) {
            return Err(Error::Config(format!(
                "proxy.fee_fraction must be within [0, 1), got {}",
                relay.fee_fraction
            )));
        }
        if relay.read_buffer_size == 0 {
            return Err(Error::Config("proxy.read_buffer_size cannot be 0".to_string()));
        }

        Ok(())
    }

    fn validate_rpc(&self) -> Result<()> {
        if !self.rpc.url.starts_with("http://") && !self.rpc.url.starts_with("https://") {
            return Err(Error::Config(format!("rpc.url must be an http(s) URL: {}", self.rpc.url)));
        }
        if self.rpc.timeout_secs == 0 {
            return Err(Error::Config("rpc.timeout_secs cannot be 0".to_string()));
        }
        Ok(())
    }

    fn validate_payout(&self) -> Result<()> {
        if !(self.payout.block_reward > 0.0) {
            return Err(Error::Config("payout.block_reward must be positive".to_string()));
        }
        self.payout.pow_limit_value()?;
        Ok(())
    }

    fn validate_database(&self) -> Result<()> {
        let url = &self.database.url;
        if !url.starts_with("sqlite:") && !url.starts_with("postgres:") && !url.starts_with("postgresql:") {
            return Err(Error::Config(format!("Unsupported database URL scheme: {}", url)));
        }
        if self.database.max_connections == 0 {
            return Err(Error::Config("database.max_connections cannot be 0".to_string()));
        }
        Ok(())
    }

    fn validate_logging(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(Error::Config(format!("Invalid log level: {}", other))),
        }
    }

    /// Merge with environment variables
    pub fn merge_env(&mut self) -> Result<()> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with("PAYPROXY_"))
            .collect();
        self.merge_vars(&vars)
    }

    fn merge_vars(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("PAYPROXY_") else {
                continue;
            };
            let override_key = match name {
                "LISTEN_PORT" => "proxy.listen_port",
                "UPSTREAM_HOST" => "proxy.upstream_host",
                "UPSTREAM_PORT" => "proxy.upstream_port",
                "POOL_ACCOUNT" => "proxy.pool_account",
                "FEE_FRACTION" => "proxy.fee_fraction",
                "RPC_URL" => "rpc.url",
                "RPC_USER" => "rpc.user",
                "RPC_PASSWORD" => "rpc.password",
                "DATABASE_URL" => "database.url",
                "LOG_LEVEL" => "logging.level",
                _ => continue,
            };
            self.apply_single_override(override_key, value)?;
        }
        Ok(())
    }

    /// Load configuration from multiple sources with priority:
    /// 1. Explicit overrides (highest priority)
    /// 2. Environment variables
    /// 3. Configuration file
    /// 4. Default values (lowest priority)
    pub fn load_from_sources(
        config_path: Option<&Path>,
        overrides: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            if path.exists() {
                config = Self::from_file(path)?;
            }
        }

        config.merge_env()?;

        if let Some(overrides) = overrides {
            config.apply_overrides(overrides)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply configuration overrides from a key-value map
    pub fn apply_overrides(&mut self, overrides: HashMap<String, String>) -> Result<()> {
        for (key, value) in overrides {
            self.apply_single_override(&key, &value)?;
        }
        Ok(())
    }

    fn apply_single_override(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "proxy.listen_port" => {
                self.proxy.listen_port = value.parse()
                    .map_err(|e| Error::Config(format!("Invalid listen_port: {}", e)))?;
            }
            "proxy.upstream_host" => {
                self.proxy.upstream_host = value.to_string();
            }
            "proxy.upstream_port" => {
                self.proxy.upstream_port = value.parse()
                    .map_err(|e| Error::Config(format!("Invalid upstream_port: {}", e)))?;
            }
            "proxy.pool_account" => {
                self.proxy.pool_account = value.to_string();
            }
            "proxy.fee_fraction" => {
                self.proxy.fee_fraction = value.parse()
                    .map_err(|e| Error::Config(format!("Invalid fee_fraction: {}", e)))?;
            }
            "rpc.url" => {
                self.rpc.url = value.to_string();
            }
            "rpc.user" => {
                self.rpc.user = value.to_string();
            }
            "rpc.password" => {
                self.rpc.password = value.to_string();
            }
            "database.url" => {
                self.database.url = value.to_string();
            }
            "logging.level" => {
                self.logging.level = value.to_string();
            }
            _ => {
                return Err(Error::Config(format!("Unknown configuration key: {}", key)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn valid_config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.proxy.pool_account = "t1YtcRXgoDsVj6sDhGA71sgdDLoR9Q1QcnL".to_string();
        config.proxy.fee_fraction = 0.1;
        config
    }

    #[test]
    fn test_default_config_requires_pool_account() {
        let config = ProxyConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool_account"));

        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_fee_fraction_range() {
        let mut config = valid_config();
        config.proxy.fee_fraction = 1.0;
        assert!(config.validate().is_err());

        config.proxy.fee_fraction = -0.01;
        assert!(config.validate().is_err());

        config.proxy.fee_fraction = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pow_limit_validation() {
        let mut config = valid_config();
        config.payout.pow_limit = "not-hex".to_string();
        assert!(config.validate().is_err());

        config.payout.pow_limit = "0x00".to_string();
        assert!(config.validate().is_err());

        config.payout.pow_limit = "0x1d00ffff".to_string();
        assert_eq!(config.payout.pow_limit_value().unwrap(), BigUint::from(0x1d00ffffu32));
    }

    #[test]
    fn test_database_scheme_validation() {
        let mut config = valid_config();
        config.database.url = "mysql://localhost/payouts".to_string();
        assert!(config.validate().is_err());

        config.database.url = "postgres://localhost/payouts".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_round_trip() {
        let config = valid_config();
        let file = NamedTempFile::new().unwrap();

        config.to_file(file.path()).unwrap();
        let loaded = ProxyConfig::from_file(file.path()).unwrap();

        assert_eq!(loaded.proxy.pool_account, config.proxy.pool_account);
        assert_eq!(loaded.proxy.fee_fraction, config.proxy.fee_fraction);
        assert_eq!(loaded.rpc, config.rpc);
        assert_eq!(loaded.database, config.database);
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let toml = r#"
            [proxy]
            upstream_host = "pool.example.com"
            pool_account = "POOLACCOUNT"
            fee_fraction = 0.05
        "#;
        let config: ProxyConfig = toml::from_str(toml).unwrap();

        assert_eq!(config.proxy.listen_port, 3333);
        assert_eq!(config.proxy.upstream_port, 3333);
        assert_eq!(config.proxy.upstream_endpoint(), "pool.example.com:3333");
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configuration_overrides() {
        let mut config = valid_config();
        let mut overrides = HashMap::new();
        overrides.insert("proxy.listen_port".to_string(), "4444".to_string());
        overrides.insert("proxy.fee_fraction".to_string(), "0.25".to_string());

        config.apply_overrides(overrides).unwrap();
        assert_eq!(config.proxy.listen_port, 4444);
        assert_eq!(config.proxy.fee_fraction, 0.25);
    }

    #[test]
    fn test_invalid_configuration_overrides() {
        let mut config = valid_config();

        let mut overrides = HashMap::new();
        overrides.insert("proxy.listen_port".to_string(), "not-a-port".to_string());
        assert!(config.apply_overrides(overrides).is_err());

        let mut overrides = HashMap::new();
        overrides.insert("proxy.unknown".to_string(), "1".to_string());
        assert!(config.apply_overrides(overrides).is_err());
    }

    #[test]
    fn test_environment_variable_mapping() {
        let mut config = valid_config();
        let mut vars = HashMap::new();
        vars.insert("PAYPROXY_UPSTREAM_HOST".to_string(), "eu1-zcash.flypool.org".to_string());
        vars.insert("PAYPROXY_UPSTREAM_PORT".to_string(), "13333".to_string());
        vars.insert("PAYPROXY_UNRELATED".to_string(), "ignored".to_string());

        config.merge_vars(&vars).unwrap();
        assert_eq!(config.proxy.upstream_endpoint(), "eu1-zcash.flypool.org:13333");
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = valid_config();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }
}
