//! Test harness for driving the proxy over real sockets: a stand-in
//! upstream pool, a line-oriented miner client and a proxy instance wired
//! to in-memory collaborators.

pub mod mocks;
pub mod utils;

pub use mocks::{LineConnection, MockPool};
pub use utils::{ProxyHarness, TestUtils, MINER_ADDRESS, POOL_ACCOUNT};
