//! # Governor
//!
//! Economic governor for the Agora engine: the ledger boundary, the
//! satiating utility function, and performance-based reward issuance.
//!
//! ## Reward Formula
//!
//! ```text
//! reward = base_reward + performance_score × scaling_factor
//! ```
//!
//! Defaults: base 80, scaling 0.4. Rewards move treasury → worker in
//! utility tokens; a reward the treasury cannot cover is deferred, never
//! dropped.

pub mod governor;
pub mod ledger;
pub mod reward;
pub mod utility;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use governor::{
    BacklogReport, DeferredReward, EconomicGovernor, RewardBatch, RewardOutcome, TransferJournal,
};
pub use ledger::{InMemoryLedger, Ledger, TransferReason, TransferReceipt, TransferRequest};
pub use reward::{RewardCalculator, RewardConfig};
pub use utility::{UtilityConfig, UtilityFunction};

/// Governor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    pub reward: RewardConfig,
    pub utility: UtilityConfig,
    /// Utility tokens minted to the treasury at startup
    pub treasury_utility_supply: Decimal,
    /// Governance tokens minted to the treasury at startup
    pub treasury_governance_supply: Decimal,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            reward: RewardConfig::default(),
            utility: UtilityConfig::default(),
            treasury_utility_supply: Decimal::from(1_000_000),
            treasury_governance_supply: Decimal::from(100_000),
        }
    }
}
