//! Band policy: top [80,100] rewarded, middle (10,80) retained, bottom [0,10] removed

use std::collections::BTreeMap;

use agora_common::WorkerId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Top,
    Middle,
    Bottom,
}

/// Population split by band, each list in id order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bands {
    pub top: Vec<WorkerId>,
    pub middle: Vec<WorkerId>,
    pub bottom: Vec<WorkerId>,
}

impl Bands {
    pub fn len(&self) -> usize {
        self.top.len() + self.middle.len() + self.bottom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct BandPolicy {
    top_floor: f64,
    bottom_ceiling: f64,
}

impl BandPolicy {
    pub fn new(top_floor: f64, bottom_ceiling: f64) -> Self {
        Self {
            top_floor,
            bottom_ceiling,
        }
    }

    pub fn classify(&self, percentile: f64) -> Band {
        if percentile >= self.top_floor {
            Band::Top
        } else if percentile <= self.bottom_ceiling {
            Band::Bottom
        } else {
            Band::Middle
        }
    }

    /// Every worker lands in exactly one band
    pub fn partition(&self, percentiles: &BTreeMap<WorkerId, f64>) -> Bands {
        let mut bands = Bands::default();
        for (id, percentile) in percentiles {
            match self.classify(*percentile) {
                Band::Top => bands.top.push(id.clone()),
                Band::Middle => bands.middle.push(id.clone()),
                Band::Bottom => bands.bottom.push(id.clone()),
            }
        }
        bands
    }
}

impl Default for BandPolicy {
    fn default() -> Self {
        Self::new(80.0, 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_boundaries_inclusive() {
        let policy = BandPolicy::default();
        assert_eq!(policy.classify(100.0), Band::Top);
        assert_eq!(policy.classify(80.0), Band::Top);
        assert_eq!(policy.classify(79.99), Band::Middle);
        assert_eq!(policy.classify(10.01), Band::Middle);
        assert_eq!(policy.classify(10.0), Band::Bottom);
        assert_eq!(policy.classify(0.0), Band::Bottom);
    }

    proptest! {
        #[test]
        fn prop_partition_covers_population(values in proptest::collection::vec(0.0f64..=100.0, 0..50)) {
            let percentiles: BTreeMap<WorkerId, f64> = values
                .iter()
                .enumerate()
                .map(|(i, p)| (WorkerId::new(format!("w-{i:03}")), *p))
                .collect();
            let bands = BandPolicy::default().partition(&percentiles);
            prop_assert_eq!(bands.len(), percentiles.len());

            let mut seen: Vec<&WorkerId> = bands.top.iter().chain(&bands.middle).chain(&bands.bottom).collect();
            seen.sort();
            seen.dedup();
            prop_assert_eq!(seen.len(), percentiles.len());
        }
    }
}
