//! Pro-rata split of the forfeited pool

use agora_common::WorkerId;
use agora_common::TOKEN_DECIMALS;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Split `pool` across `recipients` in proportion to their scores.
///
/// All-zero scores split equally. Shares are truncated to ledger precision
/// and the last recipient takes the remainder, so the shares always sum to
/// exactly `pool`.
pub fn pro_rata_shares(pool: Decimal, recipients: &[(WorkerId, f64)]) -> Vec<(WorkerId, Decimal)> {
    if recipients.is_empty() || pool <= Decimal::ZERO {
        return Vec::new();
    }

    let weights: Vec<Decimal> = recipients
        .iter()
        .map(|(_, score)| Decimal::from_f64(score.max(0.0)).unwrap_or(Decimal::ZERO))
        .collect();
    let total: Decimal = weights.iter().sum();

    let mut shares = Vec::with_capacity(recipients.len());
    let mut allocated = Decimal::ZERO;
    let last = recipients.len() - 1;

    for (idx, ((id, _), weight)) in recipients.iter().zip(&weights).enumerate() {
        let share = if idx == last {
            pool - allocated
        } else {
            let exact = if total.is_zero() {
                pool / Decimal::from(recipients.len())
            } else {
                pool * weight / total
            };
            exact.round_dp_with_strategy(TOKEN_DECIMALS, RoundingStrategy::ToZero)
        };
        allocated += share;
        shares.push((id.clone(), share));
    }
    shares
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn recipients(scores: &[f64]) -> Vec<(WorkerId, f64)> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| (WorkerId::new(format!("w-{i}")), *s))
            .collect()
    }

    #[test]
    fn test_proportional_split() {
        let shares = pro_rata_shares(dec!(100), &recipients(&[0.75, 0.25]));
        assert_eq!(shares[0].1, dec!(75));
        assert_eq!(shares[1].1, dec!(25));
    }

    #[test]
    fn test_zero_scores_split_equally() {
        let shares = pro_rata_shares(dec!(10), &recipients(&[0.0, 0.0, 0.0]));
        assert_eq!(shares[0].1, dec!(3.33333333));
        assert_eq!(shares[2].1, dec!(3.33333334));
    }

    #[test]
    fn test_empty_cases() {
        assert!(pro_rata_shares(dec!(10), &[]).is_empty());
        assert!(pro_rata_shares(Decimal::ZERO, &recipients(&[1.0])).is_empty());
    }

    proptest! {
        #[test]
        fn prop_shares_sum_to_pool(
            cents in 1u64..10_000_000,
            scores in proptest::collection::vec(0.0f64..=1.0, 1..20),
        ) {
            let pool = Decimal::new(cents as i64, 2);
            let shares = pro_rata_shares(pool, &recipients(&scores));
            let total: Decimal = shares.iter().map(|(_, s)| *s).sum();
            prop_assert_eq!(total, pool);
            prop_assert!(shares.iter().all(|(_, s)| *s >= Decimal::ZERO));
        }
    }
}
