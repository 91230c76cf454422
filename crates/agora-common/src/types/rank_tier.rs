//! Rank tiers for the tournament cycle
//!
//! Tier 1 is the highest, tier 5 the entry tier. Promotion moves a worker one
//! level up (5 → 4, ...) when the target tier still has room, and grants the
//! difference in governance-token allocation between the two tiers.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::RankingError;
use crate::{HIGHEST_RANK_TIER, LOWEST_RANK_TIER};

/// Static per-tier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankTier {
    /// 1 (highest) to 5 (lowest)
    pub level: u8,
    /// Maximum members
    pub population_cap: u32,
    /// Governance tokens a member of this tier is entitled to
    pub governance_allocation: Decimal,
    /// Percentile a member must reach to be promoted out of this tier
    pub promotion_percentile: f64,
}

/// Ordered tier table, indexed by level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankTierTable(Vec<RankTier>);

impl Default for RankTierTable {
    fn default() -> Self {
        Self(vec![
            RankTier {
                level: 1,
                population_cap: 5,
                governance_allocation: dec!(1000),
                promotion_percentile: 100.0,
            },
            RankTier {
                level: 2,
                population_cap: 20,
                governance_allocation: dec!(500),
                promotion_percentile: 95.0,
            },
            RankTier {
                level: 3,
                population_cap: 60,
                governance_allocation: dec!(250),
                promotion_percentile: 95.0,
            },
            RankTier {
                level: 4,
                population_cap: 200,
                governance_allocation: dec!(100),
                promotion_percentile: 95.0,
            },
            RankTier {
                level: 5,
                population_cap: u32::MAX,
                governance_allocation: Decimal::ZERO,
                promotion_percentile: 95.0,
            },
        ])
    }
}

impl RankTierTable {
    /// Build and validate a table: exactly levels 1..=5 in order, non-negative
    /// allocations that never increase going down the ladder
    pub fn new(tiers: Vec<RankTier>) -> Result<Self, RankingError> {
        let table = Self(tiers);
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), RankingError> {
        let expected = (LOWEST_RANK_TIER - HIGHEST_RANK_TIER + 1) as usize;
        if self.0.len() != expected {
            return Err(RankingError::InvalidTiers(format!(
                "expected {} tiers, got {}",
                expected,
                self.0.len()
            )));
        }
        for (idx, tier) in self.0.iter().enumerate() {
            if tier.level as usize != idx + 1 {
                return Err(RankingError::InvalidTiers(format!(
                    "tier at position {} has level {}",
                    idx, tier.level
                )));
            }
            if tier.governance_allocation < Decimal::ZERO {
                return Err(RankingError::InvalidTiers(format!(
                    "tier {} has negative allocation",
                    tier.level
                )));
            }
            if !(0.0..=100.0).contains(&tier.promotion_percentile) {
                return Err(RankingError::InvalidTiers(format!(
                    "tier {} promotion percentile out of range",
                    tier.level
                )));
            }
        }
        for pair in self.0.windows(2) {
            if pair[0].governance_allocation < pair[1].governance_allocation {
                return Err(RankingError::InvalidTiers(format!(
                    "tier {} allocation is below tier {}",
                    pair[0].level, pair[1].level
                )));
            }
        }
        Ok(())
    }

    /// Tier by level
    pub fn get(&self, level: u8) -> Option<&RankTier> {
        self.0.get((level as usize).checked_sub(1)?)
    }

    /// The next tier up, if any
    pub fn above(&self, level: u8) -> Option<&RankTier> {
        if level <= HIGHEST_RANK_TIER {
            return None;
        }
        self.get(level - 1)
    }

    /// One-time governance grant for moving from `from` to `to`
    pub fn promotion_grant(&self, from: u8, to: u8) -> Decimal {
        match (self.get(from), self.get(to)) {
            (Some(old), Some(new)) => {
                (new.governance_allocation - old.governance_allocation).max(Decimal::ZERO)
            }
            _ => Decimal::ZERO,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RankTier> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_valid() {
        let table = RankTierTable::default();
        assert!(table.validate().is_ok());
        assert_eq!(table.get(5).unwrap().governance_allocation, Decimal::ZERO);
        assert!(table.get(0).is_none());
        assert!(table.get(6).is_none());
    }

    #[test]
    fn test_promotion_grant() {
        let table = RankTierTable::default();
        assert_eq!(table.promotion_grant(5, 4), dec!(100));
        assert_eq!(table.promotion_grant(3, 2), dec!(250));
    }

    #[test]
    fn test_above() {
        let table = RankTierTable::default();
        assert_eq!(table.above(5).unwrap().level, 4);
        assert!(table.above(1).is_none());
    }

    #[test]
    fn test_rejects_inverted_allocations() {
        let mut tiers: Vec<RankTier> = RankTierTable::default().iter().cloned().collect();
        tiers[4].governance_allocation = dec!(5000);
        assert!(RankTierTable::new(tiers).is_err());
    }
}
