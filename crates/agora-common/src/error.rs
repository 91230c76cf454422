//! Error types for the Agora engine
//!
//! Provides a unified error type and domain-specific error variants

use thiserror::Error;

use crate::types::ids::{CycleId, TaskId, VentureId, WorkerId};
use crate::types::task::TaskStatus;

pub use crate::types::token::LedgerError;

/// Result type alias using AgoraError
pub type Result<T> = std::result::Result<T, AgoraError>;

/// Unified error type for Agora operations
#[derive(Debug, Error)]
pub enum AgoraError {
    // Worker registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    // Task lifecycle errors
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    // Ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    // Tournament errors
    #[error("Ranking error: {0}")]
    Ranking(#[from] RankingError),

    // Venture errors
    #[error("Venture error: {0}")]
    Venture(#[from] VentureError),

    // Identity errors
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Worker registry errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Worker already registered: {0}")]
    DuplicateWorker(WorkerId),

    #[error("Worker not found: {0}")]
    NotFound(WorkerId),

    #[error("Invalid worker registration: {0}")]
    InvalidRegistration(String),

    #[error("Worker {0} has no free capacity")]
    CapacityExhausted(WorkerId),

    #[error("Worker {0} is offline")]
    Offline(WorkerId),
}

/// Task lifecycle errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Invalid task spec: {0}")]
    InvalidSpec(String),

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {task_id} is not bound to worker {worker_id}")]
    NotBoundTo { task_id: TaskId, worker_id: WorkerId },

    #[error("Quality {0} outside [0, 1]")]
    InvalidQuality(f64),
}

/// Tournament ranking errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RankingError {
    #[error("Ranking cycle {cycle_id} aborted and rolled back: {reason}")]
    CycleAborted { cycle_id: CycleId, reason: String },

    #[error("Ranking cycle {cycle_id} failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        cycle_id: CycleId,
        attempts: u32,
        reason: String,
    },

    #[error("Invalid rank tier configuration: {0}")]
    InvalidTiers(String),
}

/// Venture lifecycle errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VentureError {
    #[error("Venture not found: {0}")]
    NotFound(VentureId),

    #[error("Phase budget fractions must sum to 1, got {sum}")]
    InvalidBudgetFractions { sum: String },

    #[error("Venture budget must be positive")]
    InvalidBudget,

    #[error("Venture must have at least one phase")]
    NoPhases,

    #[error("Venture {venture_id} blocked in phase {phase}: {} task(s) exhausted retries", tasks.len())]
    PhaseBlocked {
        venture_id: VentureId,
        phase: String,
        tasks: Vec<TaskId>,
    },

    #[error("Task {task_id} is not a blocked task of venture {venture_id}")]
    TaskNotBlocked { venture_id: VentureId, task_id: TaskId },

    #[error("Venture {0} already completed")]
    AlreadyCompleted(VentureId),
}

/// Identity boundary errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IdentityError {
    #[error("Credential rejected for worker {0}")]
    Unauthorized(WorkerId),

    #[error("Identity service unavailable: {0}")]
    Unavailable(String),
}

impl AgoraError {
    /// True when the error is a `NotFound` of any domain
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AgoraError::Registry(RegistryError::NotFound(_))
                | AgoraError::Task(TaskError::NotFound(_))
                | AgoraError::Venture(VentureError::NotFound(_))
        )
    }

    /// True when the error is an insufficient-balance ledger rejection
    pub fn is_insufficient_balance(&self) -> bool {
        matches!(self, AgoraError::Ledger(LedgerError::InsufficientBalance { .. }))
    }
}

impl From<serde_json::Error> for AgoraError {
    fn from(err: serde_json::Error) -> Self {
        AgoraError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AgoraError {
    fn from(err: std::io::Error) -> Self {
        AgoraError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for AgoraError {
    fn from(err: anyhow::Error) -> Self {
        AgoraError::Internal(err.to_string())
    }
}
