//! Promotion allocator
//!
//! Plans one-level promotions for top-band workers. Candidates are taken by
//! percentile (highest first, then lowest id) so the best performers get the
//! scarce seats in a capped tier. Seats are counted live: a promotion frees a
//! seat in the source tier and fills one in the target.

use std::collections::BTreeMap;

use agora_common::{RankTierTable, WorkerId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct PromotionCandidate {
    pub worker_id: WorkerId,
    pub tier: u8,
    pub percentile: f64,
}

/// Planned tier move with its governance grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    pub worker_id: WorkerId,
    pub from_tier: u8,
    pub to_tier: u8,
    pub percentile: f64,
    pub grant: Decimal,
}

pub struct PromotionAllocator<'a> {
    tiers: &'a RankTierTable,
}

impl<'a> PromotionAllocator<'a> {
    pub fn new(tiers: &'a RankTierTable) -> Self {
        Self { tiers }
    }

    /// Plan promotions given current tier populations (level → members)
    pub fn plan(
        &self,
        mut candidates: Vec<PromotionCandidate>,
        mut population: BTreeMap<u8, usize>,
    ) -> Vec<Promotion> {
        candidates.sort_by(|a, b| {
            b.percentile
                .total_cmp(&a.percentile)
                .then_with(|| a.worker_id.cmp(&b.worker_id))
        });

        let mut plan = Vec::new();
        for candidate in candidates {
            let Some(current) = self.tiers.get(candidate.tier) else {
                continue;
            };
            if candidate.percentile < current.promotion_percentile {
                continue;
            }
            let Some(target) = self.tiers.above(candidate.tier) else {
                continue;
            };

            let occupied = population.get(&target.level).copied().unwrap_or(0);
            if occupied >= target.population_cap as usize {
                debug!(worker = %candidate.worker_id, tier = target.level, "Promotion skipped: tier full");
                continue;
            }

            *population.entry(target.level).or_insert(0) += 1;
            if let Some(count) = population.get_mut(&candidate.tier) {
                *count = count.saturating_sub(1);
            }

            plan.push(Promotion {
                grant: self.tiers.promotion_grant(candidate.tier, target.level),
                worker_id: candidate.worker_id,
                from_tier: candidate.tier,
                to_tier: target.level,
                percentile: candidate.percentile,
            });
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_common::RankTier;
    use rust_decimal_macros::dec;

    fn candidate(id: &str, tier: u8, percentile: f64) -> PromotionCandidate {
        PromotionCandidate {
            worker_id: WorkerId::from(id),
            tier,
            percentile,
        }
    }

    fn population(pairs: &[(u8, usize)]) -> BTreeMap<u8, usize> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_threshold_and_grant() {
        let tiers = RankTierTable::default();
        let plan = PromotionAllocator::new(&tiers).plan(
            vec![candidate("a", 5, 100.0), candidate("b", 5, 90.0)],
            population(&[(5, 2)]),
        );
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].worker_id.as_str(), "a");
        assert_eq!(plan[0].to_tier, 4);
        assert_eq!(plan[0].grant, dec!(100));
    }

    #[test]
    fn test_capacity_goes_to_best_then_lowest_id() {
        let mut tiers: Vec<RankTier> = RankTierTable::default().iter().cloned().collect();
        tiers[3].population_cap = 1;
        let tiers = RankTierTable::new(tiers).unwrap();

        let plan = PromotionAllocator::new(&tiers).plan(
            vec![candidate("b", 5, 97.0), candidate("c", 5, 100.0), candidate("a", 5, 97.0)],
            population(&[(5, 3)]),
        );
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].worker_id.as_str(), "c");
    }

    #[test]
    fn test_top_tier_not_promoted() {
        let tiers = RankTierTable::default();
        let plan = PromotionAllocator::new(&tiers).plan(vec![candidate("a", 1, 100.0)], population(&[(1, 1)]));
        assert!(plan.is_empty());
    }

    #[test]
    fn test_full_tier_blocks() {
        let tiers = RankTierTable::default();
        let plan = PromotionAllocator::new(&tiers).plan(
            vec![candidate("a", 2, 100.0)],
            population(&[(1, 5), (2, 1)]),
        );
        assert!(plan.is_empty());
    }
}
