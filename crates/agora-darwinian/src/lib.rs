//! # Darwinian
//!
//! Tournament ranking engine (rank-and-yank) for the Agora engine.
//!
//! ## Percentile Formula
//!
//! ```text
//! percentile = 100 × avgpos / (n − 1)
//! ```
//!
//! Where:
//! - avgpos: mean 0-based ascending position of the worker's tie group
//! - n: workers with at least one performance record
//!
//! ## Bands
//!
//! - Top `[80, 100]`: performance bonus, promotion at ≥ 95 when the tier above has room
//! - Middle `(10, 80)`: retained
//! - Bottom `[0, 10]`: removed; balances forfeited and redistributed to the top band

pub mod culling;
pub mod cycle;
pub mod percentile;
pub mod promotion;

use agora_common::RankTierTable;
use serde::{Deserialize, Serialize};

pub use culling::policy::{Band, BandPolicy, Bands};
pub use culling::redistribution::pro_rata_shares;
pub use cycle::engine::{RankCycleResult, TournamentEngine};
pub use percentile::calculator::PercentileCalculator;
pub use promotion::allocator::{Promotion, PromotionAllocator, PromotionCandidate};

/// Ranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Lowest percentile of the top band (inclusive)
    pub top_band_floor: f64,
    /// Highest percentile of the bottom band (inclusive)
    pub bottom_band_ceiling: f64,
    /// Attempts made by `run_cycle_with_retry`
    pub max_attempts: u32,
    /// Delay between attempts
    pub retry_backoff_ms: u64,
    /// Tier ladder
    pub tiers: RankTierTable,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_band_floor: 80.0,
            bottom_band_ceiling: 10.0,
            max_attempts: 3,
            retry_backoff_ms: 250,
            tiers: RankTierTable::default(),
        }
    }
}
