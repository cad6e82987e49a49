//! Stratum mining proxy that credits miners for accepted shares.
//!
//! Each miner connection is relayed byte-for-byte to a fixed upstream
//! pool. Traffic in both directions is decoded on the side to track the
//! miner's payout address and share target; every share the pool accepts
//! is valued against the current network difficulty and queued as a
//! [`payout::PayoutRecord`].

pub mod codec;
pub mod config;
pub mod daemon;
pub mod database;
pub mod error;
pub mod interceptor;
pub mod logging;
pub mod metrics;
pub mod payout;
pub mod protocol;
pub mod rpc;
pub mod server;
pub mod session;
pub mod supervisor;

pub use codec::FrameDecoder;
pub use config::ProxyConfig;
pub use daemon::Daemon;
pub use database::{DatabasePool, PayoutStats};
pub use error::{Error, Result};
pub use interceptor::{Interceptor, SessionEvent};
pub use logging::init_logging;
pub use metrics::{MetricsSummary, ProxyMetrics};
pub use payout::{DifficultyOracle, PayoutFormula, PayoutRecord, PayoutStore, PayoutTrigger, ShareValueFormula};
pub use protocol::{Direction, MessageId, MessageKind, StratumMessage};
pub use rpc::RpcClient;
pub use server::ProxyServer;
pub use session::Session;
pub use supervisor::{relay, CloseReason, ConnectionSupervisor, ProxyContext, SupervisorState};

#[cfg(any(test, feature = "test-utils"))]
pub use database::MockPayoutStore;
#[cfg(any(test, feature = "test-utils"))]
pub use rpc::StaticDifficultyOracle;
