//! Payout computation for accepted shares.
//!
//! The trigger runs once per resolved submission: it asks the difficulty
//! oracle for the current network difficulty, values the share with the
//! configured [`PayoutFormula`], deducts the operator fee and hands the
//! record to the [`PayoutStore`]. No step is retried.

use crate::config::PayoutConfig;
use crate::session::Session;
use crate::{Error, Result};
use async_trait::async_trait;
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// A credit owed to a miner, settled later by an external process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub address: String,
    pub amount: f64,
    pub processed: bool,
}

impl PayoutRecord {
    /// New unprocessed record
    pub fn new(address: impl Into<String>, amount: f64) -> Self {
        Self {
            address: address.into(),
            amount,
            processed: false,
        }
    }
}

/// Source of the current network difficulty
#[async_trait]
pub trait DifficultyOracle: Send + Sync {
    async fn network_difficulty(&self) -> Result<f64>;
}

/// Values one accepted share
pub trait PayoutFormula: Send + Sync {
    fn compute(&self, network_difficulty: f64, target: &BigUint) -> Result<f64>;
}

/// Sink for payout records
#[async_trait]
pub trait PayoutStore: Send + Sync {
    async fn insert_payout(&self, record: &PayoutRecord) -> Result<()>;
}

/// Expected block reward share of a single accepted share:
/// `block_reward * (pow_limit / target) / network_difficulty`
#[derive(Debug, Clone)]
pub struct ShareValueFormula {
    block_reward: f64,
    pow_limit: BigUint,
}

impl ShareValueFormula {
    pub fn new(block_reward: f64, pow_limit: BigUint) -> Self {
        Self { block_reward, pow_limit }
    }

    pub fn from_config(config: &PayoutConfig) -> Result<Self> {
        Ok(Self::new(config.block_reward, config.pow_limit_value()?))
    }

    /// Difficulty of a share meeting `target`
    pub fn share_difficulty(&self, target: &BigUint) -> Result<f64> {
        if target.is_zero() {
            return Err(Error::Formula("Share target is zero".to_string()));
        }
        let limit = self.pow_limit.to_f64()
            .ok_or_else(|| Error::Formula("pow_limit not representable".to_string()))?;
        let target = target.to_f64()
            .ok_or_else(|| Error::Formula("Target not representable".to_string()))?;
        Ok(limit / target)
    }
}

impl PayoutFormula for ShareValueFormula {
    fn compute(&self, network_difficulty: f64, target: &BigUint) -> Result<f64> {
        if !(network_difficulty > 0.0) || !network_difficulty.is_finite() {
            return Err(Error::Formula(format!("Invalid network difficulty: {}", network_difficulty)));
        }
        let share_difficulty = self.share_difficulty(target)?;
        Ok(self.block_reward * share_difficulty / network_difficulty)
    }
}

/// Turns resolved submissions into persisted payout records
pub struct PayoutTrigger {
    oracle: Arc<dyn DifficultyOracle>,
    formula: Arc<dyn PayoutFormula>,
    store: Arc<dyn PayoutStore>,
    fee_fraction: f64,
}

impl PayoutTrigger {
    pub fn new(
        oracle: Arc<dyn DifficultyOracle>,
        formula: Arc<dyn PayoutFormula>,
        store: Arc<dyn PayoutStore>,
        fee_fraction: f64,
    ) -> Self {
        Self { oracle, formula, store, fee_fraction }
    }

    pub fn fee_fraction(&self) -> f64 {
        self.fee_fraction
    }

    /// Credit the session's address for one accepted share
    pub async fn fire(&self, session: &Session) -> Result<PayoutRecord> {
        let target = session.target()
            .ok_or_else(|| Error::Policy("Share accepted before any target was set".to_string()))?;
        let address = session.address()
            .ok_or_else(|| Error::Policy("Share accepted before authorization".to_string()))?;

        info!(address = %address, "Payout due");

        let network_difficulty = self.oracle.network_difficulty().await?;
        info!(difficulty = network_difficulty, "Found network difficulty");

        let total = self.formula.compute(network_difficulty, target)?;
        info!(total, "Computed raw payout");

        let amount = total * (1.0 - self.fee_fraction);
        info!(amount, "Amount after fee");

        let record = PayoutRecord::new(address, amount);
        self.store.insert_payout(&record).await?;

        Ok(record)
    }
}
