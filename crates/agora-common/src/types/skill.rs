//! SkillProfile - validated skill → proficiency mapping
//!
//! Used for both sides of capability matching:
//! - a worker's proficiency in each skill it offers
//! - a task's required proficiency in each skill it needs
//!
//! Every value is checked at construction time; out-of-range or NaN values
//! are rejected rather than clamped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Skill validation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SkillError {
    #[error("Proficiency for '{skill}' out of range [0,1]: {value}")]
    OutOfRange { skill: String, value: f64 },

    #[error("Proficiency value must be in [0,1], got {0}")]
    InvalidValue(f64),

    #[error("Skill name must not be empty")]
    EmptySkillName,
}

/// A proficiency or requirement level in [0,1]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Proficiency(f64);

impl Proficiency {
    pub const ZERO: Proficiency = Proficiency(0.0);
    pub const ONE: Proficiency = Proficiency(1.0);

    /// Create a proficiency, rejecting NaN and values outside [0,1]
    pub fn new(value: f64) -> Result<Self, SkillError> {
        if value.is_nan() || !(0.0..=1.0).contains(&value) {
            return Err(SkillError::InvalidValue(value));
        }
        Ok(Self(value))
    }

    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Proficiency {
    type Error = SkillError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Proficiency> for f64 {
    fn from(p: Proficiency) -> Self {
        p.0
    }
}

/// Validated skill → proficiency mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkillProfile(BTreeMap<String, Proficiency>);

impl SkillProfile {
    /// Create an empty profile
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Build a profile from `(skill, value)` pairs
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, SkillError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        pairs
            .into_iter()
            .try_fold(Self::new(), |profile, (skill, value)| profile.with(skill, value))
    }

    /// Add or replace a skill (builder style)
    pub fn with(mut self, skill: impl Into<String>, value: f64) -> Result<Self, SkillError> {
        self.insert(skill, value)?;
        Ok(self)
    }

    /// Add or replace a skill
    pub fn insert(&mut self, skill: impl Into<String>, value: f64) -> Result<(), SkillError> {
        let skill = skill.into();
        if skill.trim().is_empty() {
            return Err(SkillError::EmptySkillName);
        }
        let proficiency = Proficiency::new(value).map_err(|_| SkillError::OutOfRange {
            skill: skill.clone(),
            value,
        })?;
        self.0.insert(skill, proficiency);
        Ok(())
    }

    /// Proficiency for a skill, if present
    pub fn get(&self, skill: &str) -> Option<Proficiency> {
        self.0.get(skill).copied()
    }

    /// Proficiency for a skill, treating absence as zero
    #[inline]
    pub fn level(&self, skill: &str) -> f64 {
        self.get(skill).map(Proficiency::value).unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.value()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all levels
    pub fn total(&self) -> f64 {
        self.0.values().map(|p| p.value()).sum()
    }
}
