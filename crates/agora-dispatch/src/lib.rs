//! # Dispatch
//!
//! Worker registry, capability matching, task assignment and performance
//! tracking for the Agora engine.
//!
//! ## Matching Formula
//!
//! ```text
//! score = Σ(min(p_s, r_s) × r_s) / Σ(r_s)
//! ```
//!
//! Where:
//! - r_s: proficiency the task requires in skill s
//! - p_s: worker proficiency in s (0 when undeclared)
//!
//! A task is bound only when the best idle worker scores strictly above the
//! match threshold (0.70 by default); otherwise it stays pending.

pub mod engine;
pub mod matcher;
pub mod performance;
pub mod registry;

pub use engine::{
    AssignmentOutcome, CompletionOutcome, DispatchConfig, DispatchStats, FailureOutcome,
    TaskAssignmentEngine,
};
pub use matcher::{Candidate, CapabilityMatcher};
pub use performance::{PerformanceConfig, PerformanceTracker, WorkerPerformance};
pub use registry::{RegistrySnapshot, WorkerRegistry};

/// Score reported for a worker before any performance record exists
pub const DEFAULT_NEUTRAL_SCORE: f64 = 0.5;
