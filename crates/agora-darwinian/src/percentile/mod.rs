//! Percentile ranking
pub mod calculator;

pub use self::calculator::PercentileCalculator;
