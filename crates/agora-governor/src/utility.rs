//! Utility function with a satiation point
//!
//! ```text
//! U(q) = k1 · q                                  q ≤ Q_basic
//! U(q) = k1 · Q_basic + k2 · ln(q − Q_basic + 1)  q > Q_basic
//! ```
//!
//! Linear up to `Q_basic`, logarithmic (diminishing marginal utility) above.
//! The log term is 0 at `q = Q_basic`, so the curve is continuous there.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Utility curve parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilityConfig {
    /// Satiation point Q_basic
    pub satiation: f64,
    /// Linear slope below satiation
    pub k1: f64,
    /// Log coefficient above satiation
    pub k2: f64,
}

impl Default for UtilityConfig {
    fn default() -> Self {
        Self {
            satiation: 100.0,
            k1: 1.0,
            k2: 0.3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UtilityFunction {
    config: UtilityConfig,
}

impl UtilityFunction {
    pub fn new(config: UtilityConfig) -> Self {
        Self { config }
    }

    /// U(q); negative quantities are valued at 0
    pub fn value(&self, quantity: f64) -> f64 {
        let q = if quantity.is_nan() { 0.0 } else { quantity.max(0.0) };
        let UtilityConfig { satiation, k1, k2 } = self.config;

        if q <= satiation {
            k1 * q
        } else {
            k1 * satiation + k2 * (q - satiation + 1.0).ln()
        }
    }

    /// U(amount) for a token amount
    pub fn value_of(&self, amount: Decimal) -> f64 {
        self.value(amount.to_f64().unwrap_or(0.0))
    }

    /// U(q + gain) − U(q)
    pub fn gain(&self, current: Decimal, gain: Decimal) -> f64 {
        self.value_of(current + gain) - self.value_of(current)
    }

    /// dU/dq
    pub fn marginal(&self, quantity: f64) -> f64 {
        let q = quantity.max(0.0);
        if q <= self.config.satiation {
            self.config.k1
        } else {
            self.config.k2 / (q - self.config.satiation + 1.0)
        }
    }

    pub fn config(&self) -> &UtilityConfig {
        &self.config
    }
}

impl Default for UtilityFunction {
    fn default() -> Self {
        Self::new(UtilityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_linear_below_satiation() {
        let u = UtilityFunction::default();
        assert_eq!(u.value(0.0), 0.0);
        assert_eq!(u.value(50.0), 50.0);
        assert_eq!(u.value(100.0), 100.0);
    }

    #[test]
    fn test_log_above_satiation() {
        let u = UtilityFunction::default();
        let expected = 100.0 + 0.3 * (101.0f64).ln();
        assert!((u.value(200.0) - expected).abs() < 1e-9);
        assert!(u.marginal(200.0) < u.marginal(50.0));
    }

    #[test]
    fn test_continuous_at_satiation() {
        let u = UtilityFunction::default();
        let eps = 1e-9;
        assert!((u.value(100.0 + eps) - u.value(100.0 - eps)).abs() < 1e-6);
    }

    #[test]
    fn test_negative_valued_at_zero() {
        let u = UtilityFunction::default();
        assert_eq!(u.value(-5.0), 0.0);
        assert_eq!(u.value(f64::NAN), 0.0);
    }

    #[test]
    fn test_gain_from_decimal() {
        let u = UtilityFunction::default();
        assert!((u.gain(dec!(20), dec!(30)) - 30.0).abs() < 1e-9);
        assert!(u.gain(dec!(150), dec!(30)) < 1.0);
    }

    proptest! {
        #[test]
        fn prop_non_decreasing(a in 0.0f64..10_000.0, b in 0.0f64..10_000.0) {
            let u = UtilityFunction::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(u.value(lo) <= u.value(hi));
        }

        #[test]
        fn prop_continuous_everywhere(q in 0.0f64..1_000.0) {
            let u = UtilityFunction::default();
            prop_assert!((u.value(q + 1e-7) - u.value(q)).abs() < 1e-5);
        }
    }
}
