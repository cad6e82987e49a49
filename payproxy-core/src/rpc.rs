use crate::config::RpcConfig;
use crate::payout::DifficultyOracle;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// JSON-RPC client for the full node backing the difficulty oracle
#[derive(Debug, Clone)]
pub struct RpcClient {
    config: RpcConfig,
    client: reqwest::Client,
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct RpcRequest {
    jsonrpc: String,
    id: String,
    method: String,
    params: serde_json::Value,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

/// JSON-RPC error structure
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcClient {
    /// Create a new RPC client
    pub fn new(config: RpcConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Oracle(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Test connection to the node
    pub async fn test_connection(&self) -> Result<()> {
        self.get_difficulty().await.map(|_| ())
    }

    /// Current proof-of-work difficulty of the network
    pub async fn get_difficulty(&self) -> Result<f64> {
        self.call_rpc("getdifficulty", serde_json::Value::Array(vec![])).await
    }

    /// Make RPC call to the node
    async fn call_rpc<T>(&self, method: &str, params: serde_json::Value) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let request = RpcRequest {
            jsonrpc: "1.0".to_string(),
            id: Uuid::new_v4().to_string(),
            method: method.to_string(),
            params,
        };

        // Bounded by the client-wide timeout set in `new`
        let response = self
            .client
            .post(&self.config.url)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Oracle("RPC request timeout".to_string())
                } else {
                    Error::Oracle(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Oracle("RPC request timeout".to_string())
                } else {
                    Error::Oracle(format!("Failed to read response body: {}", e))
                }
            })?;

        // Nodes answer RPC-level errors with a 500 and a JSON error object
        let rpc_response: RpcResponse<T> = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(Error::Oracle(format!("Failed to parse JSON response: {}", e)));
            }
            Err(_) => {
                return Err(Error::Oracle(format!("HTTP error {}: {}", status, body)));
            }
        };

        if let Some(error) = rpc_response.error {
            return Err(Error::Oracle(format!(
                "RPC error {}: {}",
                error.code,
                error.message
            )));
        }

        rpc_response.result.ok_or_else(|| {
            Error::Oracle("RPC response missing result".to_string())
        })
    }
}

#[async_trait]
impl DifficultyOracle for RpcClient {
    async fn network_difficulty(&self) -> Result<f64> {
        self.get_difficulty().await
    }
}

/// Oracle returning a fixed difficulty, or always failing
#[cfg(any(test, feature = "test-utils"))]
pub struct StaticDifficultyOracle {
    difficulty: Option<f64>,
    calls: std::sync::atomic::AtomicU64,
}

#[cfg(any(test, feature = "test-utils"))]
impl StaticDifficultyOracle {
    pub fn new(difficulty: f64) -> Self {
        Self { difficulty: Some(difficulty), calls: Default::default() }
    }

    pub fn failing() -> Self {
        Self { difficulty: None, calls: Default::default() }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl DifficultyOracle for StaticDifficultyOracle {
    async fn network_difficulty(&self) -> Result<f64> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.difficulty.ok_or_else(|| Error::Oracle("Mock oracle failure".to_string()))
    }
}
