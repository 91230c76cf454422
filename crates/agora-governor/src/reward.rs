//! Reward computation: reward = base_reward + performance_score × scaling_factor

use agora_common::types::token::round_amount;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reward formula parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    pub base_reward: Decimal,
    pub scaling_factor: Decimal,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            base_reward: Decimal::from(80),
            scaling_factor: Decimal::new(4, 1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RewardCalculator {
    config: RewardConfig,
}

impl RewardCalculator {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    /// Reward for a performance score, rounded to ledger precision
    pub fn reward_for(&self, performance_score: f64) -> Decimal {
        let score = Decimal::from_f64(performance_score.max(0.0)).unwrap_or(Decimal::ZERO);
        round_amount(self.config.base_reward + score * self.config.scaling_factor)
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_formula() {
        let calc = RewardCalculator::default();
        assert_eq!(calc.reward_for(0.0), dec!(80));
        assert_eq!(calc.reward_for(1.0), dec!(80.4));
        assert_eq!(calc.reward_for(0.5), dec!(80.2));
    }

    #[test]
    fn test_custom_config_and_rounding() {
        let calc = RewardCalculator::new(RewardConfig {
            base_reward: dec!(10),
            scaling_factor: dec!(3),
        });
        assert_eq!(calc.reward_for(1.0 / 3.0), dec!(11.00000000));
    }

    #[test]
    fn test_negative_score_clamped() {
        assert_eq!(RewardCalculator::default().reward_for(-1.0), dec!(80));
    }
}
