//! Fractional percentile ranking: percentile = 100 × avgpos / (n − 1)

use std::collections::BTreeMap;

use agora_common::WorkerId;

pub struct PercentileCalculator;

impl PercentileCalculator {
    /// Percentile of every worker in `scores`.
    ///
    /// Workers are sorted ascending by score; a tie group occupying 0-based
    /// positions `i..=j` shares the average position `(i + j) / 2`. A single
    /// worker sits at 100.
    pub fn fractional(scores: &BTreeMap<WorkerId, f64>) -> BTreeMap<WorkerId, f64> {
        let n = scores.len();
        if n == 0 {
            return BTreeMap::new();
        }
        if n == 1 {
            return scores.keys().map(|id| (id.clone(), 100.0)).collect();
        }

        let mut ordered: Vec<(&WorkerId, f64)> = scores.iter().map(|(id, s)| (id, *s)).collect();
        ordered.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        let denominator = (n - 1) as f64;
        let mut percentiles = BTreeMap::new();
        let mut start = 0;
        while start < n {
            let mut end = start;
            while end + 1 < n && ordered[end + 1].1 == ordered[start].1 {
                end += 1;
            }
            let avg_position = (start + end) as f64 / 2.0;
            let percentile = 100.0 * avg_position / denominator;
            for (id, _) in &ordered[start..=end] {
                percentiles.insert((*id).clone(), percentile);
            }
            start = end + 1;
        }
        percentiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scores(pairs: &[(&str, f64)]) -> BTreeMap<WorkerId, f64> {
        pairs.iter().map(|(id, s)| (WorkerId::from(*id), *s)).collect()
    }

    #[test]
    fn test_distinct_scores() {
        let p = PercentileCalculator::fractional(&scores(&[("a", 0.1), ("b", 0.5), ("c", 0.9)]));
        assert_eq!(p[&WorkerId::from("a")], 0.0);
        assert_eq!(p[&WorkerId::from("b")], 50.0);
        assert_eq!(p[&WorkerId::from("c")], 100.0);
    }

    #[test]
    fn test_ties_share_average_position() {
        let p = PercentileCalculator::fractional(&scores(&[("a", 0.1), ("b", 0.5), ("c", 0.5), ("d", 0.9)]));
        // positions 1 and 2 → 1.5 / 3
        assert!((p[&WorkerId::from("b")] - 50.0).abs() < 1e-12);
        assert_eq!(p[&WorkerId::from("b")], p[&WorkerId::from("c")]);
    }

    #[test]
    fn test_single_and_empty() {
        assert!(PercentileCalculator::fractional(&BTreeMap::new()).is_empty());
        let p = PercentileCalculator::fractional(&scores(&[("solo", 0.0)]));
        assert_eq!(p[&WorkerId::from("solo")], 100.0);
    }

    #[test]
    fn test_all_equal_sits_mid() {
        let p = PercentileCalculator::fractional(&scores(&[("a", 0.4), ("b", 0.4), ("c", 0.4)]));
        assert!(p.values().all(|v| (*v - 50.0).abs() < 1e-12));
    }

    proptest! {
        #[test]
        fn prop_in_range_and_monotone(values in proptest::collection::vec(0.0f64..=1.0, 1..40)) {
            let map: BTreeMap<WorkerId, f64> = values
                .iter()
                .enumerate()
                .map(|(i, s)| (WorkerId::new(format!("w-{i:03}")), *s))
                .collect();
            let p = PercentileCalculator::fractional(&map);
            prop_assert_eq!(p.len(), map.len());
            for (a, sa) in &map {
                prop_assert!((0.0..=100.0).contains(&p[a]));
                for (b, sb) in &map {
                    if sa < sb {
                        prop_assert!(p[a] < p[b]);
                    }
                }
            }
        }
    }
}
