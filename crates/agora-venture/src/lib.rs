//! # Agora Venture
//!
//! Budget-phased ventures that feed the dispatch engine.
//!
//! A venture carries a total budget split across an ordered list of phases.
//! Entering a phase submits its template tasks with a per-task cost cap of
//! the phase budget divided evenly over the templates. The venture advances
//! one phase at a time once every task of the current phase has completed,
//! and blocks when one of them fails with no retries left.

pub mod manager;
pub mod phase;

pub use manager::{
    PhaseState, PhaseTask, TaskSubmitter, Venture, VentureManager, VentureStatus, VentureStatusReport,
    VentureTransition,
};
pub use phase::{validate_plan, PhaseTemplate, TaskTemplate, VenturePhase};
