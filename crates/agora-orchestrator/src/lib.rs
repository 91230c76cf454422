//! # Agora Orchestrator
//!
//! Single ownership boundary for the engine: worker registry, dispatch,
//! performance tracking, the economic governor, tournament ranking, and
//! ventures, wired together behind [`Orchestrator`].
//!
//! - [`config`]: layered node configuration
//! - [`identity`]: worker credential verification boundary
//! - [`metrics`]: Prometheus counters and gauges
//! - [`schedule`]: periodic ranking with retry of failed cycles
//! - [`api`]: axum REST surface served by `agora-node`

pub mod api;
pub mod config;
pub mod identity;
pub mod metrics;
pub mod orchestrator;
pub mod schedule;

pub use config::AgoraConfig;
pub use identity::{AllowAll, IdentityVerifier, StaticTokenVerifier};
pub use metrics::OrchestratorMetrics;
pub use orchestrator::{
    CompletionReport, FailureReport, Orchestrator, OrchestratorSnapshot, RewardStatus, TickReport,
};
pub use schedule::{CycleRunner, RankingSchedule, ScheduleReport};
