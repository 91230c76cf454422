//! # Agora Common
//!
//! Shared types, errors, events, and the rank-cycle audit log for the Agora
//! agent orchestration engine.
//!
//! ## Core Types
//!
//! - [`Worker`]: capability-bearing worker record owned by the registry
//! - [`Task`]: unit of work moving through `pending → assigned → in_progress`
//! - [`SkillProfile`]: validated skill → proficiency mapping (values in [0,1])
//! - [`PerformanceRecord`]: append-only outcome of one task attempt
//! - [`RankTier`]/[`RankTierTable`]: static tournament tier configuration
//! - [`Account`]/[`TokenKind`]: ledger addressing
//!
//! ## Infrastructure
//!
//! - [`events`]: broadcast event bus with a bounded replay log
//! - [`audit`]: hash-chained, append-only audit log for ranking cycles

pub mod audit;
pub mod error;
pub mod events;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{
    AgoraError, IdentityError, RankingError, RegistryError, Result, TaskError, VentureError,
};
pub use types::{
    ids::{CycleId, TaskId, VentureId, WorkerId},
    performance::PerformanceRecord,
    rank_tier::{RankTier, RankTierTable},
    skill::{Proficiency, SkillError, SkillProfile},
    task::{Task, TaskOrigin, TaskSpec, TaskStatus},
    token::{Account, LedgerError, TokenKind},
    worker::{Worker, WorkerRegistration, WorkerStatus},
};

/// Agora version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Matcher score a worker must strictly exceed to be bound to a task
pub const MATCH_THRESHOLD: f64 = 0.70;

/// Default rolling window for performance scores
pub const DEFAULT_PERFORMANCE_WINDOW: usize = 20;

/// Lowest (entry) rank tier
pub const LOWEST_RANK_TIER: u8 = 5;

/// Highest rank tier
pub const HIGHEST_RANK_TIER: u8 = 1;

/// Decimal places kept on every token amount
pub const TOKEN_DECIMALS: u32 = 8;

/// Current time as Unix milliseconds
#[inline]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
