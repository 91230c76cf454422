//! Capability matching: score = Σ(min(p, r) × r) / Σ(r)
//!
//! Pure and side-effect free; safe to run concurrently against a registry
//! snapshot.

use agora_common::{SkillProfile, Worker, WorkerId};
use serde::{Deserialize, Serialize};

/// Scored matcher candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub worker_id: WorkerId,
    pub score: f64,
}

pub struct CapabilityMatcher;

impl CapabilityMatcher {
    /// Weighted overlap of a worker's proficiencies with a task's requirements.
    ///
    /// Missing skills count as proficiency 0. An empty requirement mapping, or
    /// one whose requirements sum to 0, scores 0.
    pub fn score(requirements: &SkillProfile, proficiencies: &SkillProfile) -> f64 {
        let total = requirements.total();
        if requirements.is_empty() || total <= 0.0 {
            return 0.0;
        }

        let weighted: f64 = requirements
            .iter()
            .map(|(skill, required)| proficiencies.level(skill).min(required) * required)
            .sum();

        (weighted / total).clamp(0.0, 1.0)
    }

    /// Score every worker, best first; equal scores order by lowest worker id
    pub fn rank<'a, I>(requirements: &SkillProfile, workers: I) -> Vec<Candidate>
    where
        I: IntoIterator<Item = &'a Worker>,
    {
        let mut candidates: Vec<Candidate> = workers
            .into_iter()
            .map(|w| Candidate {
                worker_id: w.id.clone(),
                score: Self::score(requirements, &w.skills),
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.worker_id.cmp(&b.worker_id))
        });
        candidates
    }

    /// Highest-scoring worker, if any
    pub fn best<'a, I>(requirements: &SkillProfile, workers: I) -> Option<Candidate>
    where
        I: IntoIterator<Item = &'a Worker>,
    {
        Self::rank(requirements, workers).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_common::WorkerRegistration;
    use proptest::prelude::*;

    fn profile(pairs: &[(&str, f64)]) -> SkillProfile {
        SkillProfile::from_pairs(pairs.iter().map(|(k, v)| (*k, *v))).unwrap()
    }

    fn worker(id: &str, pairs: &[(&str, f64)]) -> Worker {
        Worker::from_registration(WorkerRegistration::new(id, profile(pairs)), 5, 0.5)
    }

    #[test]
    fn test_example_below_threshold() {
        let score = CapabilityMatcher::score(&profile(&[("python", 0.6)]), &profile(&[("python", 0.9)]));
        assert!((score - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_example_above_threshold() {
        let score = CapabilityMatcher::score(&profile(&[("python", 0.8)]), &profile(&[("python", 1.0)]));
        assert!((score - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_missing_skill_counts_zero() {
        let req = profile(&[("python", 0.8), ("sql", 0.8)]);
        let score = CapabilityMatcher::score(&req, &profile(&[("python", 1.0)]));
        // (0.8 * 0.8 + 0) / 1.6
        assert!((score - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_empty_requirements_score_zero() {
        assert_eq!(CapabilityMatcher::score(&SkillProfile::new(), &profile(&[("python", 1.0)])), 0.0);
        assert_eq!(CapabilityMatcher::score(&profile(&[("python", 0.0)]), &profile(&[("python", 1.0)])), 0.0);
    }

    #[test]
    fn test_rank_tie_breaks_on_lowest_id() {
        let workers = vec![
            worker("w-c", &[("python", 1.0)]),
            worker("w-a", &[("python", 1.0)]),
            worker("w-b", &[("python", 0.5)]),
        ];
        let ranked = CapabilityMatcher::rank(&profile(&[("python", 0.9)]), &workers);
        assert_eq!(ranked[0].worker_id.as_str(), "w-a");
        assert_eq!(ranked[1].worker_id.as_str(), "w-c");
        assert_eq!(ranked[2].worker_id.as_str(), "w-b");
    }

    proptest! {
        #[test]
        fn prop_score_in_unit_interval(
            reqs in proptest::collection::btree_map("[a-e]", 0.0f64..=1.0, 1..5),
            profs in proptest::collection::btree_map("[a-e]", 0.0f64..=1.0, 0..5),
        ) {
            let req = SkillProfile::from_pairs(reqs).unwrap();
            let prof = SkillProfile::from_pairs(profs).unwrap();
            let score = CapabilityMatcher::score(&req, &prof);
            prop_assert!((0.0..=1.0).contains(&score));
        }

        #[test]
        fn prop_full_proficiency_scores_mean_weighted_requirement(
            reqs in proptest::collection::btree_map("[a-e]", 0.01f64..=1.0, 1..5),
        ) {
            let req = SkillProfile::from_pairs(reqs.clone()).unwrap();
            let prof = SkillProfile::from_pairs(reqs.keys().map(|k| (k.clone(), 1.0))).unwrap();
            let expected = reqs.values().map(|r| r * r).sum::<f64>() / reqs.values().sum::<f64>();
            prop_assert!((CapabilityMatcher::score(&req, &prof) - expected).abs() < 1e-9);
        }
    }
}
